use http::StatusCode;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;

use crate::context::RequestContext;
use crate::error::ApiError;

/// A business handler that did not return a normal response.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerFault {
    /// The handler returned an [`ApiError`].
    Error(ApiError),
    /// The handler panicked; carries the panic message when it was a string.
    Panic(String),
    /// The handler task was cancelled before completing.
    Cancelled,
}

impl HandlerFault {
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerFault::Panic(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandlerFault::Error(_) => "error",
            HandlerFault::Panic(_) => "panic",
            HandlerFault::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFault::Error(err) => write!(f, "handler error {}", err),
            HandlerFault::Panic(msg) => write!(f, "handler panicked: {}", msg),
            HandlerFault::Cancelled => f.write_str("handler cancelled"),
        }
    }
}

/// Client-visible response chosen by an [`ErrorReporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct FaultResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl FaultResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "status": false, "message": message.into() }),
        }
    }
}

/// Receives handler faults after the ledger has been marked `Fail`.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, ctx: &RequestContext, fault: &HandlerFault) -> FaultResponse;
}

impl<F> ErrorReporter for F
where
    F: Fn(&RequestContext, &HandlerFault) -> FaultResponse + Send + Sync,
{
    fn report(&self, ctx: &RequestContext, fault: &HandlerFault) -> FaultResponse {
        self(ctx, fault)
    }
}

/// Maps [`ApiError`] codes onto HTTP statuses and hides panic details.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMappingReporter;

impl StatusMappingReporter {
    pub fn map_api_error(err: &ApiError) -> FaultResponse {
        match err.code {
            500..=599 => FaultResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            400 | 401 | 402 | 403 | 404 => {
                let status = StatusCode::from_u16(err.code).unwrap_or(StatusCode::BAD_REQUEST);
                FaultResponse::new(status, err.message.clone())
            }
            300..=399 => FaultResponse::new(StatusCode::INTERNAL_SERVER_ERROR, err.message.clone()),
            _ => FaultResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        }
    }
}

impl ErrorReporter for StatusMappingReporter {
    fn report(&self, ctx: &RequestContext, fault: &HandlerFault) -> FaultResponse {
        tracing::error!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            fault = %fault,
            "Request handler fault"
        );

        match fault {
            HandlerFault::Error(err) => Self::map_api_error(err),
            HandlerFault::Panic(_) | HandlerFault::Cancelled => {
                FaultResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_hidden() {
        let response = StatusMappingReporter::map_api_error(&ApiError::new(503, "db down"));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["message"], "Internal Server Error");
        assert_eq!(response.body["status"], false);
    }

    #[test]
    fn test_client_errors_keep_status_and_message() {
        for code in [400u16, 401, 402, 403, 404] {
            let response = StatusMappingReporter::map_api_error(&ApiError::new(code, "nope"));
            assert_eq!(response.status.as_u16(), code);
            assert_eq!(response.body["message"], "nope");
        }
    }

    #[test]
    fn test_redirect_codes_become_internal_errors() {
        let response = StatusMappingReporter::map_api_error(&ApiError::new(302, "moved"));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["message"], "moved");
    }

    #[test]
    fn test_unmapped_codes() {
        let response = StatusMappingReporter::map_api_error(&ApiError::new(418, "teapot"));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_panic_payloads() {
        let fault = HandlerFault::from_panic(Box::new("boom"));
        assert_eq!(fault, HandlerFault::Panic("boom".to_string()));

        let fault = HandlerFault::from_panic(Box::new(String::from("kaboom")));
        assert_eq!(fault, HandlerFault::Panic("kaboom".to_string()));

        let fault = HandlerFault::from_panic(Box::new(42u8));
        assert_eq!(fault.kind(), "panic");
    }
}
