//! Transfer error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a transfer session.
///
/// `FileNotFound`, `Connection` and `Config` abort a session before any task
/// starts. `Io` and `Send` end the uplink, `Receive` ends the downlink.
/// `Render` is never returned from a session; the renderer logs and drops it.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    Task(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// Maps an open/stat failure, turning `NotFound` into [`TransferError::FileNotFound`].
    pub fn from_open(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path.into())
        } else {
            Self::Io(err)
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type for transfer operations.
pub type TransferResult<T> = std::result::Result<T, TransferError>;
