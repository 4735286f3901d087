//! Error types for the bot runtime.

use thiserror::Error;

/// Bot runtime errors.
#[derive(Debug, Error)]
pub enum BotError {
    /// Wire-level failure (framing, parsing, socket I/O).
    #[error("protocol error: {0}")]
    Protocol(#[from] tmi_proto::ProtocolError),

    /// Persistence failure.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Socket-level failure outside the framed codec.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is gone and the operation cannot be queued.
    #[error("not connected")]
    NotConnected,

    /// A room actor's mailbox is closed.
    #[error("room closed: {0}")]
    RoomClosed(String),

    /// No plugin registered under this name.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BotError>;
