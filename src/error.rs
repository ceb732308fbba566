//! Unified application error model and mapping helpers.
//! Every failure that can terminate a request (authentication gate, session store,
//! remote instance, route business logic) is expressed as an `AppError` so the
//! dispatcher can translate it with a single taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::identity::{SessionError, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    InvalidSession { code: String, message: String },
    InvalidCsrf { code: String, message: String },
    BackendUnavailable { code: String, message: String },
    Backend { code: String, message: String },
    UserInput { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::InvalidSession { code, .. }
            | AppError::InvalidCsrf { code, .. }
            | AppError::BackendUnavailable { code, .. }
            | AppError::Backend { code, .. }
            | AppError::UserInput { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::InvalidSession { message, .. }
            | AppError::InvalidCsrf { message, .. }
            | AppError::BackendUnavailable { message, .. }
            | AppError::Backend { message, .. }
            | AppError::UserInput { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn invalid_session() -> Self { AppError::InvalidSession { code: "invalid_session".into(), message: "invalid session".into() } }
    pub fn invalid_csrf() -> Self { AppError::InvalidCsrf { code: "invalid_csrf".into(), message: "invalid csrf token".into() } }
    pub fn unavailable(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::BackendUnavailable { code: code.into(), message: msg.into() } }
    pub fn backend(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Backend { code: code.into(), message: msg.into() } }
    pub fn user(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn internal(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    pub fn is_invalid_session(&self) -> bool { matches!(self, AppError::InvalidSession { .. }) }

    /// Every terminal failure is reported as 500; the kind only changes the body.
    pub fn http_status(&self) -> u16 { 500 }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => AppError::invalid_session(),
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::BackendUnavailable { code: "session_store".into(), message: err.to_string() }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::BackendUnavailable { code: "remote_unreachable".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}
