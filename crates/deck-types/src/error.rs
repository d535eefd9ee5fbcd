use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Stable error codes returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    WrongPassword,
    UserBlocked,
    InsufficientBalance,
    InvalidInviteCode,
    ExpiredToken,
    DependencyFailed,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::WrongPassword => "WRONG_PASSWORD",
            Self::UserBlocked => "USER_BLOCKED",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::InvalidInviteCode => "INVALID_INVITE_CODE",
            Self::ExpiredToken => "EXPIRED_TOKEN",
            Self::DependencyFailed => "DEPENDENCY_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Client mistakes as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::DependencyFailed | Self::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every RPC method. Serialized as `{ code, message }`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "authentication required")
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "not allowed")
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", what))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn wrong_password() -> Self {
        Self::new(ErrorKind::WrongPassword, "username or password did not match")
    }

    pub fn user_blocked() -> Self {
        Self::new(ErrorKind::UserBlocked, "this account has been blocked")
    }

    pub fn insufficient_balance() -> Self {
        Self::new(ErrorKind::InsufficientBalance, "not enough coins")
    }

    pub fn invalid_invite_code() -> Self {
        Self::new(ErrorKind::InvalidInviteCode, "invite code is invalid")
    }

    pub fn expired_token() -> Self {
        Self::new(ErrorKind::ExpiredToken, "token is invalid or has expired")
    }

    pub fn dependency(service: &str) -> Self {
        Self::new(ErrorKind::DependencyFailed, format!("{} is unavailable", service))
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal, "internal error")
    }
}

/// Store failures never leak their details to clients.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("store error: {:#}", e);
        Self::internal()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let err = ApiError::insufficient_balance();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INSUFFICIENT_BALANCE");
        assert_eq!(json["message"], "not enough coins");
    }

    #[test]
    fn test_anyhow_is_masked() {
        let err: ApiError = anyhow::anyhow!("UNIQUE constraint failed: users.email").into();
        assert_eq!(err.code, ErrorKind::Internal);
        assert!(!err.message.contains("constraint"));
    }

    #[test]
    fn test_client_error_split() {
        assert!(ErrorKind::NotFound.is_client_error());
        assert!(ErrorKind::WrongPassword.is_client_error());
        assert!(!ErrorKind::Internal.is_client_error());
        assert!(!ErrorKind::DependencyFailed.is_client_error());
    }
}
