use axum::body::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::idempotency::TransactionIds;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    /// Concrete URL path of the request, not the route template.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            request_id,
            method,
            path: path.into(),
            headers,
            body,
        }
    }

    pub fn transaction_ids(&self) -> TransactionIds {
        TransactionIds::from_headers(&self.headers)
    }

    /// Parses the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
    }
}
