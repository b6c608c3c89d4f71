use thiserror::Error;

use crate::cursor::BlockRef;

/// Boxed error type accepted from user handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("substreams endpoint connection: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("call sf.substreams.rpc.v2.Stream/Blocks: {0}")]
    OpenStream(#[source] tonic::Status),

    #[error("receive stream next message: {0}")]
    Transport(#[source] tonic::Status),

    #[error("invalid cursor {cursor:?}: {reason}")]
    InvalidCursor { cursor: String, reason: String },

    #[error(
        "received new block scoped data (Block {received}) whose height is lower or equal than our most recent block (Block {latest})"
    )]
    OrderingViolation { received: BlockRef, latest: BlockRef },

    #[error(
        "cannot undo down to last valid Block {last_valid} because we already sent you Block {emitted}, the undo buffer size is too small to cover this fork"
    )]
    UndoPastEmitted { last_valid: BlockRef, emitted: BlockRef },

    #[error("malformed {0} message: missing {1}")]
    MalformedResponse(&'static str, &'static str),

    #[error("invalid block range: {0}")]
    InvalidRange(String),

    #[error("{source} (retryable)")]
    Retryable { source: BoxError },

    #[error("handler error: {source}")]
    Handler { source: BoxError },

    #[error("unable to complete work within backoff time limit")]
    BackoffExpired,

    #[error("operation cancelled")]
    Cancelled,
}

impl SinkError {
    /// Wraps an error so the sinker treats it as transient and reconnects
    /// from the active cursor instead of terminating.
    ///
    /// Return this from a handler when the failure does not invalidate any
    /// state persisted so far.
    pub fn retryable(source: impl Into<BoxError>) -> Self {
        SinkError::Retryable { source: source.into() }
    }

    /// Wraps a fatal user handler error.
    pub fn handler(source: impl Into<BoxError>) -> Self {
        SinkError::Handler { source: source.into() }
    }

    /// True only for errors that are safe to retry by reconnecting from the
    /// active cursor.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable { .. })
    }
}
