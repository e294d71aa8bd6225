//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
///
/// Any of these on a live connection means the frame is dropped together with
/// the connection; none of them is fatal to the daemon.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload does not fit the 16-bit block length
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Incomplete frame data
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// A string inside the block is not NUL terminated
    #[error("Malformed string at offset {offset}")]
    MalformedString { offset: usize },

    /// String bytes are not valid UTF-8
    #[error("Invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// Request type outside the known set
    #[error("Unknown request type: {0}")]
    UnknownRequest(u16),

    /// A request that carries exactly one path string carried a different count
    #[error("Expected {expected} string(s) in request, got {actual}")]
    UnexpectedStringCount { expected: usize, actual: usize },

    /// An interface-info line that does not follow the record layout
    #[error("Malformed device record: {0}")]
    MalformedRecord(String),

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
