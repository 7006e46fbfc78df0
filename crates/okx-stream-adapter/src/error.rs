/*
[INPUT]:  Error sources (WebSocket, protocol integrity, operations, config, misuse)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

use crate::ws::message::OperationReply;

/// Order book integrity failures.
///
/// These are signals to drop the local book and wait for a fresh snapshot,
/// not logic bugs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// Delta was computed against a different state than the one we hold
    #[error("sequence gap: expected prevSeqId {expected}, received {received}")]
    Sequence { expected: i64, received: i64 },

    /// Recomputed checksum disagrees with the server's token
    #[error("checksum mismatch: server {expected}, computed {computed}")]
    Checksum { expected: i32, computed: i32 },

    /// Price or size field could not be parsed
    #[error("invalid price level: {value}")]
    InvalidLevel { value: String },

    /// Delta received while no snapshot is held
    #[error("update received before snapshot")]
    MissingSnapshot,
}

/// One failed item inside a batch operation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// Main error type for the OKX stream adapter
#[derive(Error, Debug)]
pub enum OkxError {
    /// Transport-level failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection dropped while a correlated request was in flight
    #[error("connection lost before a reply arrived")]
    ConnectionLost,

    /// No live connection to write to
    #[error("WebSocket not connected")]
    NotConnected,

    /// Server answered with an error event
    #[error("API error (code {code}): {message}")]
    Api { code: String, message: String },

    /// Login handshake failed
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Order book integrity failure
    #[error("order book integrity: {0}")]
    Integrity(#[from] IntegrityError),

    /// Whole operation rejected by a non-zero top-level code
    #[error("operation rejected (code {code}): {message}")]
    OperationRejected {
        code: String,
        message: String,
        reply: Box<OperationReply>,
    },

    /// Batch accepted but some items failed
    #[error("{} of {} batch items failed", failures.len(), reply.data.len())]
    PartialFailure {
        failures: Vec<ItemFailure>,
        reply: Box<OperationReply>,
    },

    /// Argument validation failed before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Private channel or operation on a connection that never logs in
    #[error("{what} requires a logged-in connection")]
    LoginRequired { what: String },

    /// start() called on a running client
    #[error("client already started")]
    AlreadyStarted,

    /// Client is shutting down
    #[error("client shut down")]
    Shutdown,

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Deadline elapsed while waiting
    #[error("timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl OkxError {
    /// Check if the error is transient on the transport side
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OkxError::WebSocket(_)
                | OkxError::ConnectionLost
                | OkxError::NotConnected
                | OkxError::Timeout { .. }
        )
    }

    /// Check if the error came from order book validation
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, OkxError::Integrity(_))
    }

    /// Raw operation reply carried by operation failures
    pub fn reply(&self) -> Option<&OperationReply> {
        match self {
            OkxError::OperationRejected { reply, .. } | OkxError::PartialFailure { reply, .. } => {
                Some(reply)
            }
            _ => None,
        }
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        OkxError::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for OkxError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        OkxError::WebSocket(err.to_string())
    }
}

impl From<serde_yaml::Error> for OkxError {
    fn from(err: serde_yaml::Error) -> Self {
        OkxError::Config(err.to_string())
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, OkxError>;
