use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::idempotency::{FaultResponse, GuardOutcome, RejectReason};

/// Body of every guard rejection: `{"message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IntoResponse for RejectReason {
    /// All rejections share 409, including ledger outages.
    fn into_response(self) -> Response {
        (StatusCode::CONFLICT, Json(MessageResponse::new(self.message()))).into_response()
    }
}

impl IntoResponse for FaultResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl IntoResponse for GuardOutcome {
    fn into_response(self) -> Response {
        match self {
            GuardOutcome::Completed(body) => (StatusCode::OK, Json(body)).into_response(),
            GuardOutcome::Rejected(reason) => reason.into_response(),
            GuardOutcome::Faulted(fault) => fault.into_response(),
        }
    }
}
