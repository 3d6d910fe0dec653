use std::io;

/// Errors raised outside the command path: peer transport, pooling and
/// persistence plumbing. Command-level failures are RESP error replies, not
/// `Err` values.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("connection pool not found")]
    PoolNotFound,

    #[error("pool closed")]
    PoolClosed,

    #[error("ERR connect to {0} failed: {1}")]
    PeerUnreachable(String, String),

    #[error("ERR request to {0} timed out")]
    PeerTimeout(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
