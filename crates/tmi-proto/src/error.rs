//! Error types for protocol parsing and framing.

use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An I/O error occurred on the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The line could not be parsed as an IRC message.
    #[error("invalid message {string:?}: {cause}")]
    InvalidMessage {
        /// The raw line that failed to parse.
        string: String,
        /// Human-readable description of the failure.
        cause: String,
    },

    /// An empty line was handed to the parser.
    #[error("empty message")]
    EmptyMessage,

    /// A line exceeded the framing limit.
    #[error("message too long: {actual} bytes (limit {limit})")]
    MessageTooLong {
        /// Observed line length in bytes.
        actual: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A received line was not valid UTF-8.
    #[error("invalid utf-8 at byte {byte_pos}: {details}")]
    InvalidUtf8 {
        /// Offset of the first invalid byte.
        byte_pos: usize,
        /// Description from the UTF-8 decoder.
        details: String,
    },
}
