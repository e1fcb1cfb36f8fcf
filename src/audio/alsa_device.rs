//! ALSA PCM setup shared by the microphone and the speaker.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// What the hardware actually agreed to.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per period (one frame = one sample per channel).
    pub period_size: usize,
}

pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, Negotiated)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None)
}

pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, Negotiated)> {
    open_pcm(device, Direction::Playback, sample_rate, channels, period_size)
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, Negotiated)> {
    let label = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("cannot open PCM device '{}' for {}", device, label))?;

    {
        let hwp = HwParams::any(&pcm).context("cannot initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let negotiated = {
        let hwp = pcm.hw_params_current()?;
        Negotiated {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if negotiated.sample_rate != sample_rate {
        log::warn!(
            "ALSA {} on '{}' negotiated {}Hz instead of {}Hz",
            label,
            device,
            negotiated.sample_rate,
            sample_rate
        );
    }
    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        label,
        device,
        negotiated.sample_rate,
        negotiated.channels,
        negotiated.period_size,
    );

    Ok((pcm, negotiated))
}
