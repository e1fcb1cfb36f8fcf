//! Error taxonomy for the tactical advisory link.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// Microphone, camera or location access was refused or the device is missing.
    #[error("Media access denied: {0}")]
    MediaDenied(String),

    /// The remote channel failed to open, dropped, or refused a send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed inbound payload. The offending fragment is dropped.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Malformed hazard-zone registry entry, rejected at load time.
    #[error("Invalid hazard registry: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::Transport(e.to_string())
    }
}

impl From<base64::DecodeError> for LinkError {
    fn from(e: base64::DecodeError) -> Self {
        LinkError::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(e: toml::de::Error) -> Self {
        LinkError::Registry(e.to_string())
    }
}
