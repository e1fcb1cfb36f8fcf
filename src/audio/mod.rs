//! Audio device plumbing: the output clock the scheduler drives, and the ALSA
//! capture and render threads behind the `alsa` feature.
//!
//! Both ALSA paths run on dedicated OS threads, not tokio tasks, so real-time
//! I/O never contends with the network tasks.

mod output;
mod resample;

#[cfg(feature = "alsa")]
mod alsa_device;
#[cfg(feature = "alsa")]
mod play;
#[cfg(feature = "alsa")]
mod record;

pub use output::{AudioOutput, VoiceId};
pub use resample::Resampler;

#[cfg(feature = "alsa")]
pub use play::AlsaOutput;
#[cfg(feature = "alsa")]
pub use record::Microphone;
