// src/utils/error.rs
use crate::protocol::codec::CodecError;
use crate::worker::transport::TransportError;
use std::io;
use thiserror::Error;

/// Main error type for the coordinator
///
/// This enum represents all possible error conditions that can occur while
/// driving external workers, including transport, protocol, network, and
/// configuration errors. Worker-local failures (codec noise, protocol
/// violations, stale results) are contained at the session boundary and do
/// not appear here; what does appear is fatal to at least one worker or to
/// the whole run.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors decoding a protocol record
    #[error("Codec error: {0}")]
    CodecError(#[from] CodecError),

    /// Stream-level failures on a worker connection
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Errors in protocol handling or invalid protocol messages
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// HTTP request/response errors
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),

    /// Every worker session has terminated; mining cannot proceed
    #[error("All worker sessions terminated; mining cannot proceed")]
    NoWorkersLeft,
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered during:
/// - Work template processing
/// - Solution handling
/// Wraps the original error in an `InputError` variant.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts async task join errors into MinerError
///
/// Used when background tasks fail unexpectedly, including:
/// - Worker read loops
/// - The node polling loop
/// Wraps the original error in a `TaskError` variant.
impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}
