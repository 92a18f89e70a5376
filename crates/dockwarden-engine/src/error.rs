//! Internal error type for the engine crate, converting into [`CoreError`] at the
//! boundary where outcomes are persisted or published.

use dockwarden_core::error::{CoreError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineCrateError {
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    #[error("container engine error: {0}")]
    Container(#[from] dockwarden_docker::EngineError),

    #[error("dependency cycle detected among: {0:?}")]
    Cycle(Vec<String>),

    #[error("hook '{command}' failed with exit code {exit_code}: {stderr}")]
    HookFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("hook '{command}' requested skip (exit code 75)")]
    HookSkip { command: String },

    #[error("hook '{command}' timed out")]
    HookTimeout { command: String },

    #[error("rollback failed after update failure: {0}")]
    RollbackFailed(String),

    /// Update failed after step 4 but the snapshot was successfully restored.
    #[error("update failed, rolled back: {0}")]
    RolledBack(String),
}

impl From<EngineCrateError> for CoreError {
    fn from(err: EngineCrateError) -> Self {
        match err {
            EngineCrateError::Store(e) => e,
            EngineCrateError::Container(e) => CoreError::new(ErrorKind::EngineFailure, "ENGINE_ERROR", e.to_string()),
            EngineCrateError::Cycle(names) => {
                CoreError::conflict(format!("dependency cycle among: {}", names.join(", ")))
            }
            EngineCrateError::HookFailed { .. } => {
                CoreError::new(ErrorKind::EngineFailure, "HOOK_FAILED", err.to_string())
            }
            EngineCrateError::HookSkip { .. } => {
                CoreError::new(ErrorKind::InputInvalid, "HOOK_SKIP", err.to_string())
            }
            EngineCrateError::HookTimeout { .. } => {
                CoreError::new(ErrorKind::Transient, "HOOK_TIMEOUT", err.to_string())
            }
            EngineCrateError::RollbackFailed(msg) => CoreError::fatal(msg),
            EngineCrateError::RolledBack(msg) => {
                CoreError::new(ErrorKind::EngineFailure, "UPDATE_ROLLED_BACK", msg)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineCrateError>;
