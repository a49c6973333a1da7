//! Unified error handling for the secure wrapper API.
//!
//! Every error that can reach an HTTP response is funneled through
//! [`ApiError`], which renders the stable `{"error": "<code>"}` envelopes
//! (plus any extra fields a handler attaches). Internal failures never leak
//! their `Display` text to callers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

/// Response body shape for every error the API returns.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>) -> Self {
        Self {
            status,
            error: code.into(),
            extra: None,
        }
    }

    /// Attach extra fields (merged into the top-level JSON object).
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn rate_limited() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited")
    }

    pub fn deny_by_default() -> Self {
        Self::new(StatusCode::NOT_FOUND, "deny-by-default")
    }

    pub fn invalid_json() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_json")
    }

    pub fn missing_fields(fields: &[&str]) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "missing_fields")
            .with_extra(json!({ "fields": fields }))
    }

    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
    }

    pub fn reply_only_mode() -> Self {
        Self::new(StatusCode::FORBIDDEN, "reply_only_mode")
    }

    pub fn recipient_not_allowed() -> Self {
        Self::new(StatusCode::FORBIDDEN, "recipient_not_allowed")
    }

    pub fn calendar_write_disabled() -> Self {
        Self::new(StatusCode::FORBIDDEN, "calendar_write_disabled")
    }

    pub fn calendar_not_allowed() -> Self {
        Self::new(StatusCode::FORBIDDEN, "calendar_not_allowed")
    }

    pub fn hour_limit_exceeded() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "hour_limit_exceeded")
    }

    pub fn day_limit_exceeded() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "day_limit_exceeded")
    }

    pub fn upstream_failure() -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "upstream_failure")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, axum::Json(self)).into_response()
    }
}

/// Maps the outcome of a quota consume attempt (see `quota.rs`) onto the
/// stable error codes assigned to quota denials.
pub fn quota_denial(reason: &str) -> ApiError {
    match reason {
        "hour_limit_exceeded" => ApiError::hour_limit_exceeded(),
        "day_limit_exceeded" => ApiError::day_limit_exceeded(),
        _ => ApiError::upstream_failure(),
    }
}
