//! Error types for portlink.

use thiserror::Error;

/// Main error type for all engine operations.
#[derive(Debug, Error)]
pub enum CommsError {
    /// I/O error on a stream-backed port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed envelope, bad control message, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Envelope produced by a peer running another version.
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    /// Channel names must be non-empty.
    #[error("Invalid channel name")]
    InvalidChannel,

    /// Invalid construction parameters (identities, limits).
    #[error("Configuration error: {0}")]
    Config(String),

    /// No port attached, or the port rejected the write.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A stream frame exceeded the configured maximum.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Raised by a subscriber or reply callback.
    #[error("Handler error: {0}")]
    Handler(String),

    /// The engine task is no longer running.
    #[error("Engine stopped")]
    EngineStopped,
}

impl CommsError {
    /// Build a handler error from anything displayable.
    pub fn handler(message: impl std::fmt::Display) -> Self {
        CommsError::Handler(message.to_string())
    }
}

/// Result type alias using CommsError.
pub type Result<T> = std::result::Result<T, CommsError>;
