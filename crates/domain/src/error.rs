use std::time::Duration;

/// Shared error type used across all meshctl crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad credentials, URL or settings at construction time. Not retried.
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid login token: {0}")]
    InvalidToken(String),

    /// Handshake or authentication failure. The caller may retry.
    #[error("connection: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    #[error("a connect or close is already in progress")]
    AlreadyConnecting,

    #[error("already connected")]
    AlreadyConnected,

    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    /// Delivered to every pending call when the transport goes away.
    #[error("connection closed")]
    ConnectionClosed,

    /// The pending call was withdrawn before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// The server answered, but reported a failure in its `result` field.
    #[error("server rejected {action}: {message}")]
    Server { action: String, message: String },

    #[error("unexpected reply to {action}: {message}")]
    UnexpectedReply { action: String, message: String },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a caller could reasonably retry the operation after
    /// reconnecting. Only transport-level failures qualify.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::ConnectionClosed | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
