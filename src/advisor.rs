//! The advisory orchestrator: owns one streaming session at a time and wires
//! capture, multiplexer, tactical link and playback together.
//!
//! All session state is mutated from a single task through `&mut self`, so an
//! interruption flush can never race a newly arriving audio buffer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{AudioOutput, VoiceId};
use crate::capture::{CaptureFeeds, MediaCapture};
use crate::codec;
use crate::config::Config;
use crate::error::LinkError;
use crate::geo::Position;
use crate::link::{
    EventSink, LinkConnector, LinkEvent, LinkHandle, LinkPhase, LinkStatus, SessionEvent,
    SessionId, SessionSetup,
};
use crate::multiplexer::{Multiplexer, MuxConfig};
use crate::playback::PlaybackScheduler;
use crate::protocol::{InboundMessage, Speaker};
use crate::proximity::{ProximityAlert, ZoneTelemetry};

pub const TRANSCRIPT_LINES: usize = 7;

/// Remote phrases that raise the evacuation advisory.
pub const EVACUATION_KEYWORDS: [&str; 3] = ["evacuate", "danger", "exit"];

#[derive(Debug, Clone)]
pub struct AdvisorSettings {
    pub model: String,
    /// Rate of the PCM16 audio the endpoint sends back.
    pub inbound_sample_rate: u32,
    pub mux: MuxConfig,
}

impl AdvisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.to_string(),
            inbound_sample_rate: config.inbound_sample_rate,
            mux: MuxConfig {
                window: config.capture_window,
                sample_rate: config.capture_sample_rate,
                video_interval: config.frame_interval(),
            },
        }
    }
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            inbound_sample_rate: 24_000,
            mux: MuxConfig::default(),
        }
    }
}

/// Everything the HUD gets told.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    Status { status: LinkStatus },
    Transcript { speaker: Speaker, text: String },
    Evacuation { advisory: Option<String> },
    Proximity { alert: Option<ProximityAlert> },
    Telemetry { zones: Vec<ZoneTelemetry> },
    /// Blocking notice for the operator, e.g. a refused microphone.
    Notice { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    lines: VecDeque<TranscriptLine>,
}

impl TranscriptLog {
    pub fn push(&mut self, speaker: Speaker, text: String) {
        if self.lines.len() == TRANSCRIPT_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(TranscriptLine { speaker, text });
    }

    pub fn lines(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub fn is_evacuation(text: &str) -> bool {
    let lower = text.to_lowercase();
    EVACUATION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Standing orders for the remote advisor, including the operator's last
/// known coordinates.
pub fn system_instruction(position: Option<Position>) -> String {
    let gps = match position {
        Some(p) => format!("Lat: {:.6}, Lng: {:.6}", p.latitude, p.longitude),
        None => "awaiting GPS fix".to_string(),
    };
    format!(
        "You are the tactical safety command for an industrial facility operator.\n\
         \n\
         You receive the operator's live GPS position ({gps}), microphone audio and a \
         camera still every second. Watch the video for fire, leaks, exposed wiring and \
         structural failure. A tactical map of known hazard zones is in use.\n\
         \n\
         Orders:\n\
         1. Direct movement with cues relative to the operator's position.\n\
         2. In an emergency, route the operator to the nearest safe exit.\n\
         3. Warn immediately when the operator approaches a marked hazard zone.\n\
         \n\
         Speak briefly, loudly and clearly. Use cardinal directions and clock-face bearings."
    )
}

/// The live session. Created by `start`, destroyed by teardown.
struct StreamingSession {
    id: SessionId,
    phase: LinkPhase,
    /// Present once the connect task reports the channel open.
    link: Option<LinkHandle>,
    connecting: Option<JoinHandle<()>>,
    /// The endpoint acknowledged before the link handle arrived.
    acknowledged: bool,
    /// Held from acquisition until the endpoint acknowledges the session.
    feeds: Option<CaptureFeeds>,
    mux: Option<Multiplexer>,
    scheduler: PlaybackScheduler,
}

impl StreamingSession {
    fn enter(&mut self, phase: LinkPhase) {
        if self.phase != phase {
            log::info!("Session {}: {:?} -> {:?}", self.id, self.phase, phase);
            self.phase = phase;
        }
    }
}

pub struct AdvisoryOrchestrator {
    settings: AdvisorSettings,
    capture: Box<dyn MediaCapture>,
    connector: Arc<dyn LinkConnector>,
    output: Arc<dyn AudioOutput>,
    events: mpsc::Sender<SessionEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    session: Option<StreamingSession>,
    status: LinkStatus,
    transcript: TranscriptLog,
    evacuation: Option<String>,
    position: Option<Position>,
}

impl AdvisoryOrchestrator {
    pub fn new(
        settings: AdvisorSettings,
        capture: Box<dyn MediaCapture>,
        connector: Arc<dyn LinkConnector>,
        output: Arc<dyn AudioOutput>,
        events: mpsc::Sender<SessionEvent>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self {
            settings,
            capture,
            connector,
            output,
            events,
            notices,
            session: None,
            status: LinkStatus::Ready,
            transcript: TranscriptLog::default(),
            evacuation: None,
            position: None,
        }
    }

    /// Acquires local media and starts opening the tactical link in the
    /// background. Returns as soon as the session is `Connecting`; the link
    /// reports back through the event channel (see `handle_event`).
    ///
    /// A refused device leaves nothing acquired, moves the status to `Error`
    /// and is returned so the caller can show it. An unreachable endpoint
    /// arrives later as a `LinkEvent::Fault` and ends the session the same way.
    pub fn start(&mut self) -> Result<(), LinkError> {
        if let Some(session) = &self.session {
            log::warn!("Session {} already running, ignoring start", session.id);
            return Ok(());
        }

        let id = Uuid::new_v4();
        log::info!("Starting advisory session {}", id);
        self.set_status(LinkStatus::Connecting);

        let feeds = match self.capture.acquire() {
            Ok(feeds) => feeds,
            Err(e) => {
                self.fail_start(id, &e);
                return Err(e);
            }
        };

        let setup = SessionSetup {
            model: self.settings.model.clone(),
            system_instruction: system_instruction(self.position),
        };
        let sink = EventSink::new(id, self.events.clone());
        let connector = self.connector.clone();
        let connecting = tokio::spawn(async move {
            let event = match connector.open(setup, sink.clone()).await {
                Ok(link) => LinkEvent::Opened(link),
                Err(e) => LinkEvent::Fault(e),
            };
            sink.emit(event).await;
        });

        let mut session = StreamingSession {
            id,
            phase: LinkPhase::Idle,
            link: None,
            connecting: Some(connecting),
            acknowledged: false,
            feeds: Some(feeds),
            mux: None,
            scheduler: PlaybackScheduler::new(self.output.clone()),
        };
        session.enter(LinkPhase::Connecting);
        self.session = Some(session);
        Ok(())
    }

    /// Ends the session. Calling it with no session running does nothing.
    pub fn stop(&mut self) {
        if self.session.is_some() {
            log::info!("Stop requested");
            self.teardown(LinkStatus::Closed);
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        let current = self.session.as_ref().map(|s| s.id);
        if current != Some(event.session) {
            log::debug!("Ignoring event from stale session {}", event.session);
            return;
        }
        match event.event {
            LinkEvent::Opened(link) => self.attach(link),
            LinkEvent::Inbound(msg) => self.handle_inbound(msg),
            LinkEvent::Closed(reason) => {
                log::info!("Remote closed the session: {}", reason.as_deref().unwrap_or("no reason"));
                self.teardown(LinkStatus::Closed);
            }
            LinkEvent::Fault(e) => {
                let opening = self.session.as_ref().is_some_and(|s| s.link.is_none());
                let text = if opening {
                    format!("Could not open tactical link: {}", e)
                } else {
                    format!("Tactical link lost: {}", e)
                };
                log::error!("Session fault: {}", e);
                self.notify(Notice::Notice { text });
                self.teardown(LinkStatus::Error);
            }
        }
    }

    fn handle_inbound(&mut self, msg: InboundMessage) {
        match msg {
            InboundMessage::SetupComplete => self.activate(),
            InboundMessage::Transcript { speaker, text } => self.record_transcript(speaker, text),
            InboundMessage::Audio(bytes) => self.schedule_audio(&bytes),
            InboundMessage::Interrupted => self.interrupt(),
            InboundMessage::TurnComplete => {
                if let Some(session) = &mut self.session {
                    if session.phase == LinkPhase::Interrupted {
                        session.enter(LinkPhase::Active);
                    }
                }
            }
            InboundMessage::GoAway => log::warn!("Endpoint announced it will close the session"),
        }
    }

    fn attach(&mut self, link: LinkHandle) {
        let Some(session) = &mut self.session else {
            return;
        };
        session.connecting = None;
        if session.link.is_some() {
            log::warn!("Session {} already has a link, dropping the second", session.id);
            return;
        }
        log::info!("Session {}: tactical link open", session.id);
        session.link = Some(link);
        if session.acknowledged {
            self.activate();
        }
    }

    fn activate(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        if session.phase != LinkPhase::Connecting {
            log::debug!("Duplicate setup acknowledgement ignored");
            return;
        }
        let Some(link) = session.link.as_ref().map(LinkHandle::sender) else {
            // The pump can beat the connect task to the event channel.
            session.acknowledged = true;
            return;
        };
        let Some(feeds) = session.feeds.take() else {
            return;
        };
        let sink = EventSink::new(session.id, self.events.clone());
        session.mux = Some(Multiplexer::spawn(self.settings.mux, feeds, link, sink));
        session.enter(LinkPhase::Active);
        self.set_status(LinkStatus::Active);
    }

    fn record_transcript(&mut self, speaker: Speaker, text: String) {
        if text.is_empty() {
            return;
        }
        log::debug!("{}: {}", speaker, text);
        if speaker == Speaker::Remote && is_evacuation(&text) {
            log::warn!("Evacuation advisory: {}", text);
            self.evacuation = Some(text.clone());
            self.notify(Notice::Evacuation {
                advisory: Some(text.clone()),
            });
        }
        self.transcript.push(speaker, text.clone());
        self.notify(Notice::Transcript { speaker, text });
    }

    fn schedule_audio(&mut self, bytes: &[u8]) {
        let rate = self.settings.inbound_sample_rate;
        let Some(session) = &mut self.session else {
            return;
        };
        match session.phase {
            LinkPhase::Active => {}
            LinkPhase::Interrupted => session.enter(LinkPhase::Active),
            phase => {
                log::debug!("Dropping audio received while {:?}", phase);
                return;
            }
        }
        match codec::decode_pcm16(bytes, rate) {
            Ok(buffer) if buffer.is_empty() => {}
            Ok(buffer) => {
                let scheduled = session.scheduler.enqueue(buffer);
                log::trace!(
                    "Voice {} scheduled {:.3}..{:.3}",
                    scheduled.voice,
                    scheduled.start,
                    scheduled.end
                );
            }
            Err(e) => log::warn!("Dropping inbound audio fragment: {}", e),
        }
    }

    fn interrupt(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        if !matches!(session.phase, LinkPhase::Active | LinkPhase::Interrupted) {
            return;
        }
        let flushed = session.scheduler.flush();
        session.enter(LinkPhase::Interrupted);
        log::info!("Barge-in: flushed {} queued buffers", flushed);
    }

    /// Natural completion reported by the output device.
    pub fn retire_voice(&mut self, voice: VoiceId) -> bool {
        self.session
            .as_mut()
            .is_some_and(|s| s.scheduler.retire(voice))
    }

    /// The operator confirmed the evacuation directive. The session carries
    /// on; returns false when there was nothing to acknowledge.
    pub fn acknowledge_evacuation(&mut self) -> bool {
        match self.evacuation.take() {
            Some(advisory) => {
                log::info!("Evacuation advisory acknowledged: {}", advisory);
                self.notify(Notice::Evacuation { advisory: None });
                true
            }
            None => false,
        }
    }

    /// Latest operator position, embedded in the next session's setup.
    pub fn update_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    fn fail_start(&mut self, id: SessionId, e: &LinkError) {
        log::error!("Session {} failed to start: {}", id, e);
        self.notify(Notice::Notice {
            text: format!("Microphone or camera unavailable: {}", e),
        });
        self.set_status(LinkStatus::Error);
    }

    /// Capture timers, devices, playback and link go down in that order,
    /// before the terminal status is published.
    fn teardown(&mut self, status: LinkStatus) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(mux) = session.mux.take() {
            mux.cancel();
        }
        if let Some(connecting) = session.connecting.take() {
            connecting.abort();
        }
        session.feeds = None;
        self.capture.release();
        let flushed = session.scheduler.flush();
        if let Some(link) = session.link.as_mut() {
            link.close();
        }
        session.enter(LinkPhase::Closed);
        log::info!(
            "Session {} ended with {} ({} buffers cancelled)",
            session.id,
            status,
            flushed
        );

        if self.evacuation.take().is_some() {
            self.notify(Notice::Evacuation { advisory: None });
        }
        self.set_status(status);
    }

    fn set_status(&mut self, status: LinkStatus) {
        if self.status != status {
            log::info!("Status: {} -> {}", self.status, status);
            self.status = status;
        }
        self.notify(Notice::Status { status });
    }

    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            log::debug!("No notice listener");
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn phase(&self) -> LinkPhase {
        match &self.session {
            Some(s) => s.phase,
            None if self.status.is_terminal() => LinkPhase::Closed,
            None => LinkPhase::Idle,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn pending_playback(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |s| s.scheduler.pending_len())
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn evacuation(&self) -> Option<&str> {
        self.evacuation.as_deref()
    }

    pub fn capture_live(&self) -> bool {
        self.capture.is_live()
    }
}

impl Drop for AdvisoryOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_keeps_the_last_seven_lines() {
        let mut log = TranscriptLog::default();
        for i in 0..10 {
            log.push(Speaker::Remote, format!("line {}", i));
        }
        assert_eq!(log.len(), TRANSCRIPT_LINES);
        let first = log.lines().next().unwrap();
        assert_eq!(first.to_string(), "AI: line 3");
    }

    #[test]
    fn evacuation_keywords_ignore_case() {
        assert!(is_evacuation("EVACUATE wing B now"));
        assert!(is_evacuation("Head for the north exit"));
        assert!(is_evacuation("Danger ahead"));
        assert!(!is_evacuation("All clear, continue inspection"));
    }

    #[test]
    fn instruction_embeds_position() {
        let with = system_instruction(Some(Position {
            latitude: 51.5,
            longitude: -0.125,
        }));
        assert!(with.contains("Lat: 51.500000, Lng: -0.125000"));
        assert!(system_instruction(None).contains("awaiting GPS fix"));
    }

    #[test]
    fn notices_are_tagged_by_type() {
        let v = serde_json::to_value(Notice::Status {
            status: LinkStatus::Active,
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"type": "status", "status": "Active"}));

        let v = serde_json::to_value(Notice::Transcript {
            speaker: Speaker::Operator,
            text: "copy".into(),
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"type": "transcript", "speaker": "You", "text": "copy"}));
    }
}
