//! Real-time tactical advisory link: a live audio/video session with a remote
//! inference endpoint, running alongside a geospatial proximity-hazard engine.

pub mod advisor;
pub mod audio;
#[cfg(feature = "camera")]
pub mod camera;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod feedback;
pub mod geo;
pub mod haptic_bridge;
pub mod hazard;
pub mod hud_bridge;
pub mod link;
pub mod multiplexer;
pub mod playback;
pub mod projection;
pub mod protocol;
pub mod proximity;

pub use error::LinkError;
