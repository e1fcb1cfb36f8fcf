use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use alsa::pcm::{IO, PCM};
use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device::{self, Negotiated};
use super::output::{AudioOutput, VoiceId};
use crate::codec::PcmBuffer;

const MAX_WRITE_RETRIES: u32 = 3;

struct Voice {
    id: VoiceId,
    samples: Vec<f32>,
    rate: u64,
    start_frame: u64,
    /// Exclusive, in device frames.
    end_frame: u64,
    rendered: bool,
}

impl Voice {
    fn new(id: VoiceId, buffer: PcmBuffer, at: f64, device_rate: u64) -> Self {
        let rate = buffer.sample_rate().max(1) as u64;
        let start_frame = (at.max(0.0) * device_rate as f64).round() as u64;
        let len = (buffer.len() as u64 * device_rate).div_ceil(rate);
        Self {
            id,
            samples: buffer.into_samples(),
            rate,
            start_frame,
            end_frame: start_frame + len,
            rendered: false,
        }
    }

    /// Adds this voice's contribution to the period starting at device frame `base`.
    ///
    /// A voice that missed its start frame before any of it was rendered is
    /// moved to `base` whole, so it plays from its first sample.
    fn mix_into(&mut self, mix: &mut [f32], base: u64, device_rate: u64) {
        if !self.rendered && self.start_frame < base {
            let len = self.end_frame - self.start_frame;
            self.start_frame = base;
            self.end_frame = base + len;
        }
        let period_end = base + mix.len() as u64;
        let from = self.start_frame.max(base);
        let to = self.end_frame.min(period_end);
        for t in from..to {
            let src = ((t - self.start_frame) * self.rate / device_rate) as usize;
            if let Some(s) = self.samples.get(src) {
                mix[(t - base) as usize] += s;
            }
            self.rendered = true;
        }
    }
}

struct Shared {
    voices: Mutex<Vec<Voice>>,
    /// First device frame not yet mixed. Voices scheduled at or after it are
    /// heard in full.
    frames_mixed: AtomicU64,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl Shared {
    fn voices(&self) -> MutexGuard<'_, Vec<Voice>> {
        match self.voices.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// ALSA speaker output. A render thread mixes every scheduled voice into
/// consecutive periods; the clock is the number of frames mixed so far.
pub struct AlsaOutput {
    shared: Arc<Shared>,
    sample_rate: u32,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AlsaOutput {
    pub fn open(
        device: &str,
        sample_rate: u32,
        channels: u32,
        period_size: usize,
        completions: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Self> {
        let period = (period_size > 0).then_some(period_size);
        let (pcm, params) = alsa_device::open_playback(device, sample_rate, channels, period)?;

        let shared = Arc::new(Shared {
            voices: Mutex::new(Vec::new()),
            frames_mixed: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("audio-render".into())
                .spawn(move || {
                    if let Err(e) = render_loop(pcm, params, &shared, completions) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            shared,
            sample_rate: params.sample_rate,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = match self.handle.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AudioOutput for AlsaOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.shared.frames_mixed.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn start(&self, buffer: PcmBuffer, at: f64) -> VoiceId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let voice = Voice::new(id, buffer, at, self.sample_rate as u64);
        self.shared.voices().push(voice);
        id
    }

    fn stop(&self, voice: VoiceId) {
        self.shared.voices().retain(|v| v.id != voice);
    }
}

fn render_loop(
    pcm: PCM,
    params: Negotiated,
    shared: &Shared,
    completions: mpsc::UnboundedSender<VoiceId>,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let rate = params.sample_rate as u64;
    let channels = params.channels.max(1) as usize;
    let period = params.period_size.max(1);
    let mut mix = vec![0f32; period];
    let mut out = vec![0i16; period * channels];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        channels,
        period,
    );

    while shared.running.load(Ordering::Relaxed) {
        let base = shared.frames_mixed.load(Ordering::Acquire);
        let period_end = base + period as u64;
        mix.fill(0.0);

        let finished: Vec<VoiceId> = {
            let mut voices = shared.voices();
            let mut finished = Vec::new();
            voices.retain_mut(|v| {
                v.mix_into(&mut mix, base, rate);
                if v.end_frame <= period_end {
                    finished.push(v.id);
                    false
                } else {
                    true
                }
            });
            // Published under the lock: a voice started after this point
            // lands in the next period, not in the one just mixed.
            shared.frames_mixed.store(period_end, Ordering::Release);
            finished
        };

        for (i, s) in mix.iter().enumerate() {
            let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            out[i * channels..(i + 1) * channels].fill(v);
        }

        write_period(&io, &pcm, &out, channels)?;

        for id in finished {
            let _ = completions.send(id);
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

/// Writes one period, retrying short writes and recovering from XRUNs. After
/// a few failed recoveries the rest of the period is dropped so a device that
/// cannot keep up does not wedge the thread.
fn write_period(io: &IO<'_, i16>, pcm: &PCM, out: &[i16], channels: usize) -> Result<()> {
    let total_frames = out.len() / channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        match io.writei(&out[frames_written * channels..]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;
                pcm.prepare()?;
                if retry_count >= MAX_WRITE_RETRIES {
                    log::error!(
                        "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                        retry_count,
                        total_frames - frames_written
                    );
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_is_resampled_onto_the_device_timeline() {
        // 4 samples at 24 kHz on a 48 kHz device, starting at frame 2.
        let buffer = PcmBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 24_000);
        let mut voice = Voice::new(1, buffer, 2.0 / 48_000.0, 48_000);
        assert_eq!(voice.start_frame, 2);
        assert_eq!(voice.end_frame, 10);

        let mut mix = vec![0f32; 6];
        voice.mix_into(&mut mix, 0, 48_000);
        assert_eq!(mix, vec![0.0, 0.0, 0.1, 0.1, 0.2, 0.2]);

        let mut mix = vec![0f32; 6];
        voice.mix_into(&mut mix, 6, 48_000);
        assert_eq!(mix, vec![0.3, 0.3, 0.4, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn late_voice_plays_from_its_first_sample() {
        // Scheduled at frame 0, but the render thread is already at 1024.
        let buffer = PcmBuffer::new(vec![0.1, 0.2, 0.3], 48_000);
        let mut voice = Voice::new(7, buffer, 0.0, 48_000);

        let mut mix = vec![0f32; 4];
        voice.mix_into(&mut mix, 1024, 48_000);
        assert_eq!(mix, vec![0.1, 0.2, 0.3, 0.0]);
        assert_eq!(voice.start_frame, 1024);
        assert_eq!(voice.end_frame, 1027);
    }

    #[test]
    fn voice_already_playing_is_not_moved() {
        let buffer = PcmBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 48_000);
        let mut voice = Voice::new(2, buffer, 0.0, 48_000);

        let mut mix = vec![0f32; 2];
        voice.mix_into(&mut mix, 0, 48_000);
        assert_eq!(mix, vec![0.1, 0.2]);

        let mut mix = vec![0f32; 2];
        voice.mix_into(&mut mix, 2, 48_000);
        assert_eq!(mix, vec![0.3, 0.4]);
        assert_eq!(voice.end_frame, 4);
    }
}
