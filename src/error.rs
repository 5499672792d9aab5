//! Error taxonomy for the translation runtime.
//!
//! Mirrors the propagation policy in the specification's error-handling
//! design: configuration and boot errors are fatal and surface to the
//! caller as a single error; transport/shutdown/callback errors are logged
//! and swallowed at their own layer and never reach here.

use thiserror::Error;

/// Top-level error type returned by [`crate::client::Client`] and the task
/// supervisor core.
#[derive(Debug, Error)]
pub enum PalabraError {
    /// Invalid configuration detected at construction time: wrong
    /// reader/writer variant, multiple targets, unparseable config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A boot-time failure: transport connect failure, task-config
    /// handshake timeout, missing translation track after retries.
    #[error("boot error: {0}")]
    Boot(String),

    /// The REST session-credential collaborator failed.
    #[error("session request failed: {0}")]
    Session(#[from] reqwest::Error),

    /// I/O failure reading/writing audio data.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encode/decode failure.
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// Control-channel JSON decode failure. Per spec, decode errors are
    /// normally absorbed into `ControlMessage::Unknown` rather than
    /// surfaced here; this variant exists for paths that must fail hard
    /// (e.g. malformed `current_task` during the boot handshake).
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The WebSocket transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A bounded wait exceeded its deadline.
    #[error("timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, String),
}

pub type Result<T> = std::result::Result<T, PalabraError>;
