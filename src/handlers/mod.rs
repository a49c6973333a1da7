//! Route handlers and the shared body-reading helper.

pub mod auth_token;
pub mod calendar;
pub mod email;
pub mod health;

use axum::body::Body;
use axum::http::Request;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Reads and parses a JSON body under `max_bytes`, enforcing the payload
/// cap in two layers: an early reject on a declared `Content-Length` over
/// the limit, then a hard stop during the read itself so a streamed body
/// without an honest `Content-Length` cannot exceed it either.
pub async fn read_json_body<T: DeserializeOwned>(
    request: Request<Body>,
    max_bytes: usize,
) -> Result<T, ApiError> {
    if let Some(declared) = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if declared > max_bytes {
            return Err(ApiError::payload_too_large());
        }
    }

    let body = request.into_body();
    let bytes = axum::body::to_bytes(body, max_bytes)
        .await
        .map_err(|_| ApiError::payload_too_large())?;

    serde_json::from_slice(&bytes).map_err(|_| ApiError::invalid_json())
}
