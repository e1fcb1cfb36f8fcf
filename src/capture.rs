//! Local media acquisition: microphone samples and camera stills.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::LinkError;

#[cfg(feature = "alsa")]
use crate::audio::Microphone;
#[cfg(feature = "camera")]
use crate::camera::CameraFeed;
#[cfg(feature = "alsa")]
use crate::config::Config;
#[cfg(feature = "camera")]
use std::time::Duration;

/// Mic chunks in flight between the capture thread and the multiplexer.
pub const AUDIO_QUEUE: usize = 32;

/// What an acquired capture source hands to the multiplexer.
pub struct CaptureFeeds {
    /// Normalized mono chunks of whatever length the device delivers.
    pub audio: mpsc::Receiver<Vec<f32>>,
    /// The most recent JPEG still. Closed when there is no camera.
    pub video: watch::Receiver<Option<Bytes>>,
}

pub trait MediaCapture: Send {
    /// Acquires the devices. A refusal is `LinkError::MediaDenied` and leaves
    /// nothing acquired.
    fn acquire(&mut self) -> Result<CaptureFeeds, LinkError>;

    /// Stops capture and releases every device. Safe to call repeatedly.
    fn release(&mut self);

    fn is_live(&self) -> bool;
}

#[cfg(feature = "alsa")]
pub struct DeviceCapture {
    device: String,
    sample_rate: u32,
    #[cfg(feature = "camera")]
    camera_index: u32,
    #[cfg(feature = "camera")]
    frame_interval: Duration,
    #[cfg(feature = "camera")]
    jpeg_quality: u8,
    mic: Option<Microphone>,
    #[cfg(feature = "camera")]
    camera: Option<CameraFeed>,
}

#[cfg(feature = "alsa")]
impl DeviceCapture {
    pub fn new(config: &Config) -> Self {
        Self {
            device: config.capture_device.to_string(),
            sample_rate: config.capture_sample_rate,
            #[cfg(feature = "camera")]
            camera_index: config.camera_index,
            #[cfg(feature = "camera")]
            frame_interval: config.frame_interval(),
            #[cfg(feature = "camera")]
            jpeg_quality: config.jpeg_quality,
            mic: None,
            #[cfg(feature = "camera")]
            camera: None,
        }
    }
}

#[cfg(feature = "alsa")]
impl MediaCapture for DeviceCapture {
    fn acquire(&mut self) -> Result<CaptureFeeds, LinkError> {
        self.release();

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE);
        let (video_tx, video_rx) = watch::channel(None);

        let mic = Microphone::open(&self.device, self.sample_rate, audio_tx)?;
        log::debug!(
            "Microphone device rate {}Hz, delivering {}Hz",
            mic.device_rate(),
            mic.sample_rate()
        );

        #[cfg(feature = "camera")]
        {
            match CameraFeed::open(
                self.camera_index,
                self.frame_interval,
                self.jpeg_quality,
                video_tx,
            ) {
                Ok(camera) => self.camera = Some(camera),
                Err(e) => {
                    drop(mic);
                    return Err(e);
                }
            }
        }
        #[cfg(not(feature = "camera"))]
        {
            log::info!("Built without camera support, video path disabled");
            drop(video_tx);
        }

        log::info!("Media capture acquired");
        self.mic = Some(mic);
        Ok(CaptureFeeds {
            audio: audio_rx,
            video: video_rx,
        })
    }

    fn release(&mut self) {
        let mut released = false;
        if let Some(mut mic) = self.mic.take() {
            mic.close();
            released = true;
        }
        #[cfg(feature = "camera")]
        if let Some(mut camera) = self.camera.take() {
            camera.close();
            released = true;
        }
        if released {
            log::info!("Media capture released");
        }
    }

    fn is_live(&self) -> bool {
        self.mic.as_ref().is_some_and(|m| m.is_running())
    }
}

#[cfg(feature = "alsa")]
impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.release();
    }
}
