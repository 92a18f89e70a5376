// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error taxonomy shared by every dockwarden crate.
//!
//! Leaf components return a [`CoreError`] tagged with an [`ErrorKind`]; intermediate
//! components add context without swallowing it; only the outermost loop (scheduler
//! tick, stream handler, HTTP handler) translates a `CoreError` into a user-visible
//! outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kind for retry/routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad user input (malformed token, unknown container). Surfaced verbatim.
    InputInvalid,
    /// Referenced entity absent. Retryable by the caller only.
    NotFound,
    /// State precondition violated (token reused, duplicate stream, cycle in graph).
    Conflict,
    /// Network, registry-5xx, store-busy. Caller may retry.
    #[default]
    Transient,
    /// Invalid credentials, revoked/untrusted certificate, expired session.
    AuthFailure,
    /// Container engine failed during pull/stop/create/start.
    EngineFailure,
    /// Data-store corruption, CA unparseable, cannot bind socket.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputInvalid => "input_invalid",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::AuthFailure => "auth_failure",
            Self::EngineFailure => "engine_failure",
            Self::Fatal => "fatal",
        }
    }

    /// Whether a caller may retry an error of this kind without operator intervention.
    ///
    /// Per the error-handling design, the scheduler itself never auto-retries a
    /// failed update regardless of this flag — it only governs whether a *caller*
    /// (e.g. the registry client's own internal retry) is allowed to retry.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::NotFound)
    }
}

/// Structured error carrying a kind, a stable code, and an optional cause chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<CoreError>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputInvalid, "INPUT_INVALID", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, "CONFLICT", message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, "TRANSIENT", message)
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, "AUTH_FAILURE", message)
    }

    pub fn engine_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineFailure, "ENGINE_FAILURE", message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, "FATAL", message)
    }

    pub fn with_cause(mut self, cause: CoreError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::not_found("row not found"),
            other => CoreError::new(ErrorKind::Transient, "STORE_ERROR", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::new(ErrorKind::InputInvalid, "JSON_ERROR", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_kind() {
        assert!(ErrorKind::Transient.retryable());
        assert!(ErrorKind::NotFound.retryable());
        assert!(!ErrorKind::Conflict.retryable());
        assert!(!ErrorKind::Fatal.retryable());
    }

    #[test]
    fn display_includes_code_and_cause() {
        let err = CoreError::engine_failure("pull failed")
            .with_cause(CoreError::transient("registry timeout"));
        let rendered = err.to_string();
        assert!(rendered.contains("ENGINE_FAILURE"));
        assert!(rendered.contains("registry timeout"));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
