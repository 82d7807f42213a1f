//! Backend error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while supervising the sound backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sclang executable not found; install SuperCollider or set backend.sclang-path")]
    SclangNotFound,

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend stdin closed, cannot send commands")]
    StdinClosed,

    #[error("Backend did not report ready within {0:?}")]
    BootTimeout(Duration),

    #[error("Backend process terminated unexpectedly")]
    Terminated,
}

impl BackendError {
    /// Check if booting again could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::SclangNotFound => false,
            BackendError::UnsupportedPlatform(_) => false,
            BackendError::Io(_) => true,
            BackendError::StdinClosed => true,
            BackendError::BootTimeout(_) => true,
            BackendError::Terminated => true,
        }
    }
}
