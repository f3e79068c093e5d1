use thiserror::Error;

/// Errors raised while framing, parsing or exchanging controller messages.
#[derive(Error, Debug)]
pub enum WireError {
    /// Message payload could not be parsed
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Frame length prefix exceeds the allowed maximum
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out waiting for the peer
    #[error("timeout")]
    Timeout,

    /// I/O operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the error is confined to one message and the connection can
    /// keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::Malformed(_) | WireError::FrameTooLarge { .. })
    }
}

/// Convenience Result type for wire operations
pub type Result<T> = std::result::Result<T, WireError>;
