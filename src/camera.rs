//! Camera stills for the video path.
//!
//! The camera is owned by its own thread for its whole life; some backends
//! hand out handles that must not cross threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use tokio::sync::watch;

use crate::error::LinkError;

pub struct CameraFeed {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraFeed {
    /// Opens camera `index` and publishes one JPEG still per `interval` into
    /// `frames`. Returns once the device has either opened or refused.
    pub fn open(
        index: u32,
        interval: Duration,
        quality: u8,
        frames: watch::Sender<Option<Bytes>>,
    ) -> Result<Self, LinkError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("camera".into())
                .spawn(move || camera_loop(index, interval, quality, frames, &running, ready_tx))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(LinkError::MediaDenied(format!("camera {}: {}", index, reason)))
            }
            Err(_) => {
                let _ = handle.join();
                Err(LinkError::MediaDenied(format!(
                    "camera {}: capture thread exited",
                    index
                )))
            }
        }
    }

    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_camera(index: u32) -> Result<Camera> {
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), format)?;
    camera.open_stream()?;
    Ok(camera)
}

fn camera_loop(
    index: u32,
    interval: Duration,
    quality: u8,
    frames: watch::Sender<Option<Bytes>>,
    running: &AtomicBool,
    ready: std_mpsc::Sender<Result<(), String>>,
) {
    let mut camera = match open_camera(index) {
        Ok(c) => {
            let _ = ready.send(Ok(()));
            c
        }
        Err(e) => {
            let _ = ready.send(Err(format!("{:#}", e)));
            return;
        }
    };
    log::info!("Camera {} opened: {:?}", index, camera.camera_format());

    let mut last_still: Option<Instant> = None;
    while running.load(Ordering::Relaxed) {
        // Frames are pulled continuously so the driver queue never goes stale;
        // only one per interval is compressed.
        let frame = match camera.frame() {
            Ok(f) => f,
            Err(e) => {
                log::debug!("Camera frame error: {}", e);
                thread::sleep(Duration::from_millis(50));
                continue;
            }
        };
        if last_still.is_some_and(|t| t.elapsed() < interval) {
            continue;
        }
        last_still = Some(Instant::now());

        match encode_jpeg(&frame, quality) {
            Ok(jpeg) => {
                if frames.send(Some(Bytes::from(jpeg))).is_err() {
                    break;
                }
            }
            Err(e) => log::debug!("Dropping camera frame: {:#}", e),
        }
    }

    if let Err(e) = camera.stop_stream() {
        log::warn!("Failed to stop camera stream: {}", e);
    }
    log::info!("Camera {} closed", index);
}

fn encode_jpeg(frame: &nokhwa::Buffer, quality: u8) -> Result<Vec<u8>> {
    let decoded = frame.decode_image::<RgbFormat>()?;
    let (width, height) = (decoded.width(), decoded.height());
    let rgb = image::RgbImage::from_raw(width, height, decoded.into_raw())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    image::DynamicImage::ImageRgb8(rgb).write_with_encoder(encoder)?;
    Ok(out)
}
