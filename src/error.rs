use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level errors raised outside the guarded request path.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Error raised by a business handler.
///
/// Returning one of these from a handler is a fault: the guard marks the
/// request as failed and hands the error to the configured error reporter,
/// which picks the client-visible status from `code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    #[serde(rename = "source")]
    pub origin: Option<String>,
}

impl ApiError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::not_found("order missing").with_origin("orders");
        assert_eq!(err.to_string(), "[404] order missing");
        assert_eq!(err.origin.as_deref(), Some("orders"));
    }

    #[test]
    fn test_app_error_from_io() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();
        assert!(err.to_string().contains("port taken"));
    }
}
