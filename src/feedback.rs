//! Sensory feedback fired by the proximity engine when its throttle allows.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::AudioOutput;
use crate::codec::PcmBuffer;
use crate::proximity::ProximityAlert;

#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn pulse(&self, alert: &ProximityAlert) -> anyhow::Result<()>;
}

const CHIME_SECS: f64 = 0.4;
const SWEEP_SECS: f64 = 0.1;
const START_HZ: f64 = 440.0;
const END_HZ: f64 = 880.0;
const START_GAIN: f64 = 0.1;
const END_GAIN: f64 = 0.01;

/// Square-wave warning chime: pitch sweeps up an octave, volume decays
/// exponentially over the whole chime.
pub fn warning_chime(sample_rate: u32) -> PcmBuffer {
    let rate = sample_rate.max(1) as f64;
    let len = (CHIME_SECS * rate).round() as usize;
    let mut samples = Vec::with_capacity(len);
    let mut phase = 0.0f64;

    for i in 0..len {
        let t = i as f64 / rate;
        let freq = if t < SWEEP_SECS {
            START_HZ * (END_HZ / START_HZ).powf(t / SWEEP_SECS)
        } else {
            END_HZ
        };
        let gain = START_GAIN * (END_GAIN / START_GAIN).powf(t / CHIME_SECS);
        let level = if phase < 0.5 { gain } else { -gain };
        samples.push(level as f32);
        phase = (phase + freq / rate).fract();
    }
    PcmBuffer::new(samples, sample_rate)
}

/// Plays the warning chime on the speaker, immediately, on top of whatever
/// the advisor is saying.
pub struct ChimeFeedback {
    output: Arc<dyn AudioOutput>,
}

impl ChimeFeedback {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl FeedbackSink for ChimeFeedback {
    async fn pulse(&self, alert: &ProximityAlert) -> anyhow::Result<()> {
        let chime = warning_chime(self.output.sample_rate());
        let voice = self.output.start(chime, self.output.now());
        log::debug!("Chime voice {} for {}", voice, alert.zone_id);
        Ok(())
    }
}
