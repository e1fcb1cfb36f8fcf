//! The output-clock abstraction the playback scheduler drives.

use crate::codec::PcmBuffer;

pub type VoiceId = u64;

/// An audio output device with its own monotonically advancing clock.
///
/// `start` queues a buffer to begin at an absolute time on that clock. Once
/// a voice has played to its end the implementation reports its id on the
/// completion channel it was built with. Stopped voices are not reported.
pub trait AudioOutput: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Current time on the output timeline, in seconds.
    fn now(&self) -> f64;

    fn start(&self, buffer: PcmBuffer, at: f64) -> VoiceId;

    fn stop(&self, voice: VoiceId);
}
