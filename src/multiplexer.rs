//! Outbound frame multiplexer: turns the microphone and camera feeds into two
//! independent frame streams on one link.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use bytes::Bytes;

use crate::capture::CaptureFeeds;
use crate::codec;
use crate::error::LinkError;
use crate::link::{EventSink, LinkCommand, LinkEvent};
use crate::protocol::OutboundFrame;

#[derive(Debug, Clone, Copy)]
pub struct MuxConfig {
    /// Samples per outbound audio frame.
    pub window: usize,
    pub sample_rate: u32,
    pub video_interval: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            window: 4096,
            sample_rate: 16_000,
            video_interval: Duration::from_secs(1),
        }
    }
}

pub struct Multiplexer {
    audio: JoinHandle<()>,
    video: JoinHandle<()>,
}

impl Multiplexer {
    pub fn spawn(
        config: MuxConfig,
        feeds: CaptureFeeds,
        link: mpsc::Sender<LinkCommand>,
        sink: EventSink,
    ) -> Self {
        let audio = tokio::spawn(audio_pump(
            feeds.audio,
            config.window.max(1),
            config.sample_rate,
            link.clone(),
            sink.clone(),
        ));
        let video = tokio::spawn(video_ticker(feeds.video, config.video_interval, link, sink));
        log::debug!(
            "Multiplexer started: window={} interval={:?}",
            config.window,
            config.video_interval
        );
        Self { audio, video }
    }

    /// Stops both paths. No frame is queued after this returns.
    pub fn cancel(&self) {
        self.audio.abort();
        self.video.abort();
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.cancel();
    }
}

enum Offer {
    Sent,
    Dropped,
    Closed,
}

fn offer(link: &mpsc::Sender<LinkCommand>, frame: OutboundFrame) -> Offer {
    let mime = frame.mime_hint();
    match link.try_send(LinkCommand::Send(frame)) {
        Ok(()) => Offer::Sent,
        Err(TrySendError::Full(_)) => {
            log::debug!("Link queue full, dropping {} frame", mime);
            Offer::Dropped
        }
        Err(TrySendError::Closed(_)) => Offer::Closed,
    }
}

async fn link_lost(sink: &EventSink, path: &str) {
    log::warn!("Link closed under the {} path", path);
    sink.emit(LinkEvent::Fault(LinkError::Transport(format!(
        "link closed while sending {}",
        path
    ))))
    .await;
}

async fn audio_pump(
    mut mic: mpsc::Receiver<Vec<f32>>,
    window: usize,
    sample_rate: u32,
    link: mpsc::Sender<LinkCommand>,
    sink: EventSink,
) {
    let mut pending: Vec<f32> = Vec::with_capacity(window * 2);
    while let Some(chunk) = mic.recv().await {
        pending.extend_from_slice(&chunk);
        while pending.len() >= window {
            let bytes = codec::encode_pcm16(&pending[..window]);
            pending.drain(..window);
            if let Offer::Closed = offer(&link, OutboundFrame::audio(bytes, sample_rate)) {
                link_lost(&sink, "audio").await;
                return;
            }
        }
    }
    log::debug!("Microphone feed ended");
}

async fn video_ticker(
    mut stills: watch::Receiver<Option<Bytes>>,
    interval: Duration,
    link: mpsc::Sender<LinkCommand>,
    sink: EventSink,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match stills.has_changed() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => {
                log::debug!("Camera feed ended");
                return;
            }
        }
        let Some(jpeg) = stills.borrow_and_update().clone() else {
            continue;
        };
        if let Offer::Closed = offer(&link, OutboundFrame::video(jpeg)) {
            link_lost(&sink, "video").await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SessionEvent;
    use crate::protocol::FrameKind;
    use uuid::Uuid;

    struct Rig {
        mic: mpsc::Sender<Vec<f32>>,
        stills: watch::Sender<Option<Bytes>>,
        link: mpsc::Receiver<LinkCommand>,
        events: mpsc::Receiver<SessionEvent>,
        mux: Multiplexer,
    }

    fn rig(window: usize) -> Rig {
        let (mic, audio) = mpsc::channel(16);
        let (stills, video) = watch::channel(None);
        let (link_tx, link) = mpsc::channel(16);
        let (events_tx, events) = mpsc::channel(4);
        let mux = Multiplexer::spawn(
            MuxConfig {
                window,
                ..MuxConfig::default()
            },
            CaptureFeeds { audio, video },
            link_tx,
            EventSink::new(Uuid::new_v4(), events_tx),
        );
        Rig {
            mic,
            stills,
            link,
            events,
            mux,
        }
    }

    fn frame(cmd: LinkCommand) -> OutboundFrame {
        match cmd {
            LinkCommand::Send(f) => f,
            LinkCommand::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn audio_goes_out_one_full_window_at_a_time() {
        let mut r = rig(4096);
        r.mic.send(vec![0.25; 3000]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(r.link.try_recv().is_err());

        r.mic.send(vec![0.25; 3000]).await.unwrap();
        let f = frame(r.link.recv().await.unwrap());
        assert_eq!(f.kind, FrameKind::Audio { sample_rate: 16_000 });
        assert_eq!(f.payload.len(), 4096 * 2);

        // 1904 carried over, 2192 more completes the next window.
        r.mic.send(vec![0.25; 2192]).await.unwrap();
        let f = frame(r.link.recv().await.unwrap());
        assert_eq!(f.payload.len(), 4096 * 2);
        drop(r.mux);
    }

    #[tokio::test(start_paused = true)]
    async fn video_sends_only_fresh_stills_once_per_tick() {
        let mut r = rig(4096);
        r.stills.send(Some(Bytes::from_static(b"jpeg-1"))).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let f = frame(r.link.try_recv().unwrap());
        assert_eq!(f.kind, FrameKind::Video);
        assert_eq!(&f.payload[..], b"jpeg-1");
        assert!(r.link.try_recv().is_err());

        r.stills.send(Some(Bytes::from_static(b"jpeg-2"))).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(&frame(r.link.try_recv().unwrap()).payload[..], b"jpeg-2");
        drop(r.mux);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_link_is_reported_as_a_transport_fault() {
        let mut r = rig(8);
        drop(r.link);
        r.mic.send(vec![0.0; 8]).await.unwrap();
        let ev = r.events.recv().await.unwrap();
        assert!(matches!(ev.event, LinkEvent::Fault(LinkError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_both_paths() {
        let mut r = rig(8);
        r.mux.cancel();
        let _ = r.mic.send(vec![0.0; 64]).await;
        let _ = r.stills.send(Some(Bytes::from_static(b"late")));
        tokio::time::sleep(Duration::from_secs(3)).await;
        // Both tasks dropped their senders.
        assert!(r.link.recv().await.is_none());
    }
}
