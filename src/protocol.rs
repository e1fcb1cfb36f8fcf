//! JSON messages exchanged with the remote inference endpoint.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::LinkError;

// ======================== Outbound ========================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Little-endian PCM16, mono.
    Audio { sample_rate: u32 },
    /// One compressed JPEG still.
    Video,
}

/// One media frame on its way to the remote endpoint.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl OutboundFrame {
    pub fn audio(payload: impl Into<Bytes>, sample_rate: u32) -> Self {
        Self {
            kind: FrameKind::Audio { sample_rate },
            payload: payload.into(),
        }
    }

    pub fn video(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Video,
            payload: payload.into(),
        }
    }

    pub fn mime_hint(&self) -> String {
        match self.kind {
            FrameKind::Audio { sample_rate } => format!("audio/pcm;rate={}", sample_rate),
            FrameKind::Video => "image/jpeg".to_string(),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Empty {}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl ClientMessage {
    pub fn setup(model: &str, system_instruction: &str) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(system_instruction.to_string()),
                    inline_data: None,
                }],
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        })
    }

    pub fn realtime(frame: &OutboundFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: frame.mime_hint(),
                data: codec::to_wire(&frame.payload),
            }],
        })
    }
}

// ======================== Inbound ========================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Empty>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub output_transcription: Option<Transcription>,
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Speaker {
    /// The remote advisor.
    #[serde(rename = "AI")]
    Remote,
    /// Echo of what the operator said.
    #[serde(rename = "You")]
    Operator,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Remote => write!(f, "AI"),
            Speaker::Operator => write!(f, "You"),
        }
    }
}

/// A single inbound item, already unwrapped from its JSON envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SetupComplete,
    Transcript { speaker: Speaker, text: String },
    /// Raw PCM16 bytes at the endpoint's output rate.
    Audio(Vec<u8>),
    Interrupted,
    TurnComplete,
    GoAway,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        serde_json::from_str(text).map_err(|e| LinkError::Decode(e.to_string()))
    }

    /// Flattens the envelope into items in processing order: transcripts,
    /// audio, interruption, turn completion. Audio parts whose base64 is
    /// malformed are dropped individually.
    pub fn into_inbound(self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        if self.setup_complete.is_some() {
            out.push(InboundMessage::SetupComplete);
        }
        if let Some(content) = self.server_content {
            if let Some(t) = content.output_transcription {
                out.push(InboundMessage::Transcript {
                    speaker: Speaker::Remote,
                    text: t.text,
                });
            }
            if let Some(t) = content.input_transcription {
                out.push(InboundMessage::Transcript {
                    speaker: Speaker::Operator,
                    text: t.text,
                });
            }
            if let Some(turn) = content.model_turn {
                for blob in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                    if !blob.mime_type.starts_with("audio/") {
                        log::debug!("Ignoring inline {} part", blob.mime_type);
                        continue;
                    }
                    match codec::from_wire(&blob.data) {
                        Ok(bytes) => out.push(InboundMessage::Audio(bytes)),
                        Err(e) => log::warn!("Dropping audio fragment: {}", e),
                    }
                }
            }
            if content.interrupted {
                out.push(InboundMessage::Interrupted);
            }
            if content.turn_complete {
                out.push(InboundMessage::TurnComplete);
            }
        }
        if self.go_away.is_some() {
            out.push(InboundMessage::GoAway);
        }
        out
    }
}
