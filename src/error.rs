//! Error types for the Holo assistant core

use thiserror::Error;

/// Result type alias for Holo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not open a conversation with the chat service
    #[error("session init error: {0}")]
    SessionInit(String),

    /// Stream or poll failure mid-conversation
    #[error("transport error: {0}")]
    Transport(String),

    /// Could not produce audio for a reply
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech capture failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Microphone access refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error should surface to the caller instead of becoming
    /// a spoken apology turn
    #[must_use]
    pub const fn is_session_init(&self) -> bool {
        matches!(self, Self::SessionInit(_))
    }
}
