#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use sentinel_link::LinkError;
use sentinel_link::audio::{AudioOutput, VoiceId};
use sentinel_link::capture::{CaptureFeeds, MediaCapture};
use sentinel_link::codec::PcmBuffer;
use sentinel_link::link::{EventSink, LinkCommand, LinkConnector, LinkHandle, SessionSetup};
use tokio::sync::{mpsc, watch};

// ---------- journal ----------

#[derive(Default)]
struct JournalState {
    steps: Vec<String>,
    link: Option<mpsc::Receiver<LinkCommand>>,
}

impl JournalState {
    /// Link commands are queued, not called, so they are picked up here in
    /// the order they were issued relative to the other steps.
    fn drain_link(&mut self) {
        let Some(rx) = self.link.as_mut() else {
            return;
        };
        while let Ok(cmd) = rx.try_recv() {
            let step = match cmd {
                LinkCommand::Close => "close",
                LinkCommand::Send(_) => "send",
            };
            self.steps.push(step.to_string());
        }
    }
}

/// Ordered record of what the session did to capture, output and link.
#[derive(Clone, Default)]
pub struct Journal {
    inner: Arc<Mutex<JournalState>>,
}

impl Journal {
    pub fn note(&self, step: impl Into<String>) {
        let mut s = self.inner.lock().unwrap();
        s.drain_link();
        s.steps.push(step.into());
    }

    pub fn steps(&self) -> Vec<String> {
        let mut s = self.inner.lock().unwrap();
        s.drain_link();
        s.steps.clone()
    }

    fn watch_link(&self, commands: mpsc::Receiver<LinkCommand>) {
        self.inner.lock().unwrap().link = Some(commands);
    }
}

// ---------- capture ----------

#[derive(Default)]
pub struct CaptureState {
    pub deny: bool,
    pub acquisitions: usize,
    pub releases: usize,
    pub mic: Option<mpsc::Sender<Vec<f32>>>,
    pub camera: Option<watch::Sender<Option<Bytes>>>,
}

impl CaptureState {
    pub fn live(&self) -> bool {
        self.mic.is_some()
    }
}

#[derive(Clone, Default)]
pub struct FakeCapture {
    pub state: Arc<Mutex<CaptureState>>,
    pub journal: Option<Journal>,
}

impl FakeCapture {
    pub fn denying() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().deny = true;
        fake
    }

    pub fn mic(&self) -> mpsc::Sender<Vec<f32>> {
        self.state.lock().unwrap().mic.clone().expect("capture not acquired")
    }
}

impl MediaCapture for FakeCapture {
    fn acquire(&mut self) -> Result<CaptureFeeds, LinkError> {
        let mut s = self.state.lock().unwrap();
        if s.deny {
            return Err(LinkError::MediaDenied("permission refused".into()));
        }
        let (mic, audio) = mpsc::channel(16);
        let (camera, video) = watch::channel(None);
        s.mic = Some(mic);
        s.camera = Some(camera);
        s.acquisitions += 1;
        Ok(CaptureFeeds { audio, video })
    }

    fn release(&mut self) {
        let mut s = self.state.lock().unwrap();
        if s.mic.take().is_some() {
            s.releases += 1;
            if let Some(journal) = &self.journal {
                journal.note("release");
            }
        }
        s.camera = None;
    }

    fn is_live(&self) -> bool {
        self.state.lock().unwrap().live()
    }
}

// ---------- link ----------

#[derive(Default)]
pub struct ConnectorState {
    pub fail: bool,
    pub hang: bool,
    pub setups: Vec<SessionSetup>,
    pub commands: Vec<mpsc::Receiver<LinkCommand>>,
    pub sinks: Vec<EventSink>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub state: Arc<Mutex<ConnectorState>>,
    pub journal: Option<Journal>,
}

impl FakeConnector {
    pub fn failing() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().fail = true;
        fake
    }

    /// Accepts the connection and never finishes the handshake.
    pub fn hanging() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().hang = true;
        fake
    }

    /// Outbound commands of the most recently opened link.
    pub fn take_commands(&self) -> mpsc::Receiver<LinkCommand> {
        self.state.lock().unwrap().commands.pop().expect("no link opened")
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().setups.len()
    }
}

#[async_trait]
impl LinkConnector for FakeConnector {
    async fn open(&self, setup: SessionSetup, sink: EventSink) -> Result<LinkHandle, LinkError> {
        let hang = self.state.lock().unwrap().hang;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut s = self.state.lock().unwrap();
        if s.fail {
            return Err(LinkError::Transport("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        s.setups.push(setup);
        s.sinks.push(sink);
        match &self.journal {
            Some(journal) => journal.watch_link(rx),
            None => s.commands.push(rx),
        }
        Ok(LinkHandle::new(tx, None))
    }
}

// ---------- output ----------

#[derive(Debug, Clone, PartialEq)]
pub struct Started {
    pub voice: VoiceId,
    pub at: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct OutputState {
    pub now: f64,
    pub next_id: VoiceId,
    pub started: Vec<Started>,
    pub stopped: Vec<VoiceId>,
}

/// Output whose clock only moves when the test says so.
#[derive(Default)]
pub struct ManualOutput {
    pub state: Mutex<OutputState>,
    pub journal: Option<Journal>,
}

impl ManualOutput {
    pub fn advance_to(&self, t: f64) {
        self.state.lock().unwrap().now = t;
    }

    pub fn started(&self) -> Vec<Started> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<VoiceId> {
        self.state.lock().unwrap().stopped.clone()
    }
}

impl AudioOutput for ManualOutput {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn start(&self, buffer: PcmBuffer, at: f64) -> VoiceId {
        let mut s = self.state.lock().unwrap();
        s.next_id += 1;
        let voice = s.next_id;
        s.started.push(Started {
            voice,
            at,
            duration: buffer.duration(),
        });
        voice
    }

    fn stop(&self, voice: VoiceId) {
        self.state.lock().unwrap().stopped.push(voice);
        if let Some(journal) = &self.journal {
            journal.note(format!("stop {}", voice));
        }
    }
}

/// `secs` of silence as PCM16 at 24 kHz.
pub fn pcm16_silence(secs: f64) -> Vec<u8> {
    vec![0u8; (secs * 24_000.0).round() as usize * 2]
}
