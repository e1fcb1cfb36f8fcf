use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alsa_device::{self, Negotiated};
use super::resample::Resampler;
use crate::error::LinkError;

/// ALSA microphone streaming normalized mono chunks at the requested rate,
/// one ALSA period each.
pub struct Microphone {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    device_rate: u32,
    sample_rate: u32,
}

impl Microphone {
    /// Opens the capture device on the calling thread so a refusal surfaces
    /// here as `MediaDenied`, then hands it to a dedicated reader thread.
    ///
    /// The hardware may settle on another rate; chunks are resampled to
    /// `sample_rate` before they leave the reader.
    pub fn open(
        device: &str,
        sample_rate: u32,
        tx: mpsc::Sender<Vec<f32>>,
    ) -> Result<Self, LinkError> {
        let (pcm, params) = alsa_device::open_capture(device, sample_rate, 1)
            .map_err(|e| LinkError::MediaDenied(format!("microphone: {:#}", e)))?;

        if params.sample_rate == 0 {
            return Err(LinkError::MediaDenied(
                "microphone reported a zero sample rate".into(),
            ));
        }
        let resampler = Resampler::new(params.sample_rate, sample_rate);
        if !resampler.is_passthrough() {
            log::info!(
                "Microphone runs at {}Hz, resampling to {}Hz",
                params.sample_rate,
                sample_rate
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("mic-capture".into())
                .spawn(move || {
                    if let Err(e) = record_loop(pcm, params, resampler, tx, &running) {
                        log::error!("Microphone thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            running,
            handle: Some(handle),
            device_rate: params.sample_rate,
            sample_rate,
        })
    }

    /// Rate the hardware agreed to.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Rate of the chunks this microphone delivers.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the reader and waits for it; the device is closed when it exits.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.close();
    }
}

fn record_loop(
    pcm: PCM,
    params: Negotiated,
    mut resampler: Resampler,
    tx: mpsc::Sender<Vec<f32>>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let channels = params.channels.max(1) as usize;
    let mut read_buf = vec![0i16; params.period_size * channels];
    let mut dropped: u64 = 0;

    log::info!(
        "Microphone started: rate={} (delivering {}), ch={}, period={}",
        params.sample_rate,
        resampler.to_rate(),
        channels,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                let chunk = resampler.process(&downmix(&read_buf[..frames * channels], channels));
                if chunk.is_empty() {
                    continue;
                }
                // Never block the device thread on the async side.
                match tx.try_send(chunk) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        log::debug!("Microphone chunk dropped ({} so far)", dropped);
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::info!("Microphone receiver dropped");
                        break;
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Microphone stopped");
    Ok(())
}

/// Interleaved i16 frames to normalized mono.
fn downmix(interleaved: &[i16], channels: usize) -> Vec<f32> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum as f32 / channels as f32) / 32768.0
        })
        .collect()
}
