//! Unified application error model and mapping helpers.
//! Guard denials, store failures and request validation problems all funnel
//! into `AppError`, which the HTTP layer renders with `http_status()`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::identity::{Denial, DenyKind, LoginError, SessionError, StoreError};
use crate::password::PasswordError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    Unauthenticated { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::Unauthenticated { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::Unauthenticated { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn unauthenticated<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthenticated { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::Unauthenticated { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Internal { .. } => 500,
        }
    }

    pub fn is_internal(&self) -> bool { matches!(self, AppError::Internal { .. }) }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<Denial> for AppError {
    fn from(d: Denial) -> Self {
        match d.kind {
            DenyKind::Unauthenticated => AppError::unauthenticated("unauthenticated".into(), d.reason),
            DenyKind::Forbidden => AppError::forbidden("forbidden".into(), d.reason),
            DenyKind::NotFound => AppError::not_found("not_found".into(), d.reason),
            DenyKind::Internal => AppError::internal("internal".into(), d.reason),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => AppError::not_found("not_found".into(), m),
            StoreError::Conflict(m) => AppError::conflict("conflict".into(), m),
            StoreError::InvariantViolation(m) => AppError::conflict("invariant_violation".into(), m),
            StoreError::Backend(m) => AppError::internal("store_error".into(), m),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(e) => e.into(),
            e @ SessionError::TokenGeneration(_) => AppError::internal("token_generation".into(), e.to_string()),
        }
    }
}

impl From<LoginError> for AppError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::InvalidCredentials => {
                AppError::unauthenticated("invalid_credentials", "Email address or password was incorrect.")
            }
            LoginError::Deactivated => AppError::unauthenticated("deactivated", "This account has been deactivated."),
            LoginError::Store(e) => AppError::internal("store_error".into(), e.to_string()),
            LoginError::Session(e) => e.into(),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self { AppError::internal("password_hash".into(), err.to_string()) }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
