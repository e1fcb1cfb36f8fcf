//! The tactical link: one long-lived bidirectional WebSocket session to the
//! remote inference endpoint.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, protocol::Message};
use url::Url;
use uuid::Uuid;

use crate::error::LinkError;
use crate::protocol::{ClientMessage, InboundMessage, OutboundFrame, ServerMessage};

const COMMAND_QUEUE: usize = 100;

/// Upper bound on the WebSocket handshake plus the setup message.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Connecting,
    Active,
    /// Transient barge-in state, only reachable from `Active`.
    Interrupted,
    Closed,
}

/// Status string surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkStatus {
    Ready,
    Connecting,
    Active,
    Error,
    Closed,
}

impl LinkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkStatus::Error | LinkStatus::Closed)
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkStatus::Ready => "Ready",
            LinkStatus::Connecting => "Connecting",
            LinkStatus::Active => "Active",
            LinkStatus::Error => "Error",
            LinkStatus::Closed => "Closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum LinkEvent {
    /// The channel is open and the setup has been sent.
    Opened(LinkHandle),
    Inbound(InboundMessage),
    /// The remote endpoint closed the channel.
    Closed(Option<String>),
    /// The channel failed; the session must end with status `Error`.
    Fault(LinkError),
}

#[derive(Debug)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: LinkEvent,
}

/// Tags everything a session's tasks report with that session's id.
#[derive(Clone, Debug)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once nobody is listening any more.
    pub async fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .await
            .is_ok()
    }
}

#[derive(Debug)]
pub enum LinkCommand {
    Send(OutboundFrame),
    Close,
}

#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub system_instruction: String,
}

/// Owning handle on an open link: the outbound queue and the pump task.
#[derive(Debug)]
pub struct LinkHandle {
    commands: mpsc::Sender<LinkCommand>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn new(commands: mpsc::Sender<LinkCommand>, task: Option<JoinHandle<()>>) -> Self {
        Self { commands, task }
    }

    pub fn sender(&self) -> mpsc::Sender<LinkCommand> {
        self.commands.clone()
    }

    /// Asks the pump to send a close frame. If the request cannot be queued
    /// the pump is aborted instead, so the link is gone either way.
    pub fn close(&mut self) {
        if self.commands.try_send(LinkCommand::Close).is_err() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Opens the remote channel and sends the session setup. Returns once the
    /// channel is open; the endpoint's acknowledgement arrives later as
    /// `InboundMessage::SetupComplete`.
    async fn open(&self, setup: SessionSetup, sink: EventSink) -> Result<LinkHandle, LinkError>;
}

pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(ws_url: &str, api_key: Option<&str>) -> Result<Self, LinkError> {
        let mut url =
            Url::parse(ws_url).map_err(|e| LinkError::Config(format!("bad ws_url: {}", e)))?;
        if let Some(key) = api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(Self {
            url,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl LinkConnector for WsConnector {
    async fn open(&self, setup: SessionSetup, sink: EventSink) -> Result<LinkHandle, LinkError> {
        log::info!(
            "Connecting tactical link to {} (session {})",
            self.url.host_str().unwrap_or("?"),
            sink.session()
        );
        let setup_json =
            serde_json::to_string(&ClientMessage::setup(&setup.model, &setup.system_instruction))
                .map_err(|e| LinkError::Transport(e.to_string()))?;

        let handshake = async move {
            let (ws_stream, _) = connect_async(self.url.as_str()).await?;
            let (mut write, read) = ws_stream.split();
            write.send(Message::Text(setup_json.into())).await?;
            Ok::<_, LinkError>((write, read))
        };
        let (write, read) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                LinkError::Transport(format!(
                    "no handshake within {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;
        log::debug!("Setup sent for model {}", setup.model);

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let link = TacticalLink { sink, commands: rx };
        let task = tokio::spawn(link.run(write, read));
        Ok(LinkHandle::new(tx, Some(task)))
    }
}

enum Exit {
    Local,
    Remote(Option<String>),
}

struct TacticalLink {
    sink: EventSink,
    commands: mpsc::Receiver<LinkCommand>,
}

impl TacticalLink {
    async fn run<W, R>(mut self, mut write: W, mut read: R)
    where
        W: Sink<Message, Error = WsError> + Unpin + Send,
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
    {
        match self.pump(&mut write, &mut read).await {
            Ok(Exit::Local) => {
                log::info!("Closing tactical link (session {})", self.sink.session());
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
            }
            Ok(Exit::Remote(reason)) => {
                log::info!("Remote closed tactical link: {:?}", reason);
                self.sink.emit(LinkEvent::Closed(reason)).await;
            }
            Err(e) => {
                log::error!("Tactical link failed: {}", e);
                self.sink.emit(LinkEvent::Fault(e)).await;
            }
        }
    }

    async fn pump<W, R>(&mut self, write: &mut W, read: &mut R) -> Result<Exit, LinkError>
    where
        W: Sink<Message, Error = WsError> + Unpin + Send,
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
    {
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.dispatch(text.as_str()).await {
                                return Ok(Exit::Local);
                            }
                        }
                        // The endpoint may carry its JSON in binary frames.
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => {
                                if !self.dispatch(text).await {
                                    return Ok(Exit::Local);
                                }
                            }
                            Err(_) => log::warn!("Dropping non-UTF-8 binary message ({} bytes)", data.len()),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            return Ok(Exit::Remote(frame.map(|f| f.reason.as_str().to_string())));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(Exit::Remote(None)),
                    }
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(LinkCommand::Send(frame)) => {
                            let json = serde_json::to_string(&ClientMessage::realtime(&frame))
                                .map_err(|e| LinkError::Transport(e.to_string()))?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Some(LinkCommand::Close) | None => return Ok(Exit::Local),
                    }
                }
            }
        }
    }

    /// Returns false when the orchestrator has gone away.
    async fn dispatch(&self, text: &str) -> bool {
        let msg = match ServerMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping unparseable inbound message: {}", e);
                return true;
            }
        };
        for item in msg.into_inbound() {
            if !self.sink.emit(LinkEvent::Inbound(item)).await {
                return false;
            }
        }
        true
    }
}
