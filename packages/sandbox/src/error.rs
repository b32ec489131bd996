// ABOUTME: Error taxonomy for sandbox orchestration
// ABOUTME: Every error carries a kind so the boundary layer can map it to a status

use std::time::Duration;

use chainlab_identity::StorageError;
use thiserror::Error;

/// Classification of a [`SandboxError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid lifecycle transition attempted.
    Conflict,
    /// The backing container vanished outside our control.
    StaleHandle,
    /// Transient container-runtime failure; safe to retry.
    RuntimeUnavailable,
    /// Non-transient container-runtime failure.
    Runtime,
    /// Command issued before the sandbox was running.
    NotReady,
    /// The in-sandbox request never reached the control plane.
    Transport,
    /// Deadline exceeded; the in-sandbox side effect may or may not have
    /// completed.
    ExecTimeout,
    /// Runtime call succeeded but the durable record did not follow.
    Inconsistent,
    /// Unknown owner.
    NotFound,
    /// Identity store failure.
    Storage,
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Invalid lifecycle transition: {0}")]
    Conflict(String),

    #[error("Sandbox instance vanished: {0}")]
    StaleHandle(String),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container runtime failure: {0}")]
    Runtime(String),

    #[error("Sandbox not ready: {0}")]
    NotReady(String),

    #[error("Command could not reach the sandbox control plane: {0}")]
    Transport(String),

    #[error("Command deadline of {0:?} exceeded; side effect unknown")]
    ExecTimeout(Duration),

    #[error("Runtime and identity store diverged: {0}")]
    Inconsistent(String),

    #[error("Unknown owner: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::StaleHandle(_) => ErrorKind::StaleHandle,
            Self::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ExecTimeout(_) => ErrorKind::ExecTimeout,
            Self::Inconsistent(_) => ErrorKind::Inconsistent,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether a caller may retry the same call without inspecting state
    /// first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RuntimeUnavailable | ErrorKind::ExecTimeout
        )
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
