//! Admission pipeline: authentication, replay defense, and per-principal
//! rate limiting.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::audit::AuditEntry;
use crate::error::ApiError;
use crate::replay::{self, ReplayError};
use crate::server::AppState;
use crate::telemetry::{TraceContext, current_trace_id};
use crate::token::{self, TokenError};

/// The authenticated identity of a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

const API_KEY_PRINCIPAL: &str = "api-key";

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .or_else(|| headers.get("x-agent-key"))
        .and_then(|value| value.to_str().ok())
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Runs the two credential modes in order: API key, then
/// bearer token (including the replay-marker install). Returns the
/// authenticated principal or a stable deny reason.
pub async fn authenticate(state: &AppState, headers: &HeaderMap, now: i64) -> Result<Principal, &'static str> {
    if let Some(candidate) = extract_api_key(headers) {
        return if subtle::ConstantTimeEq::ct_eq(candidate.as_bytes(), state.config.api_key.as_bytes()).into() {
            Ok(Principal(API_KEY_PRINCIPAL.to_string()))
        } else {
            Err("invalid_api_key")
        };
    }

    let Some(raw_token) = extract_bearer(headers) else {
        return Err("missing_credentials");
    };

    let claims = token::verify(
        raw_token,
        &state.config.token_signing_key_current,
        &state.config.token_signing_key_previous,
        now,
    )
    .map_err(token_deny_reason)?;

    match state.replay_store.install(&claims.jti, claims.exp, now) {
        Ok(()) => Ok(Principal(claims.sub)),
        Err(ReplayError::AlreadyUsed) => Err("replay_detected"),
        Err(ReplayError::Io(_)) => Err("replay_store_unavailable"),
    }
}

fn token_deny_reason(err: TokenError) -> &'static str {
    match err {
        TokenError::Malformed => "malformed_token",
        TokenError::BadSignature => "bad_signature",
        TokenError::Expired => "token_expired",
        TokenError::IssuedInFuture => "issued_in_future",
        TokenError::EmptySubject => "empty_subject",
        TokenError::AudienceMismatch => "audience_mismatch",
        TokenError::UnsafeJti => "unsafe_jti",
    }
}

/// Wraps every `/v1/*` route except token minting: authenticate, rate
/// limit, then bind the principal into request extensions for downstream
/// handlers and the audit logger.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers().clone();
    let path = request.uri().path().to_string();
    let now = replay::now_unix();

    let principal = match authenticate(&state, &headers, now).await {
        Ok(principal) => principal,
        Err(reason) => {
            state.audit_log.record(&AuditEntry {
                ts: now,
                trace_id: current_trace_id(),
                principal: "unknown".to_string(),
                path,
                action: "auth_deny".to_string(),
                reason: Some(reason.to_string()),
                detail: None,
            });
            return Err(ApiError::unauthorized());
        }
    };

    if state.rate_limiter.is_rate_limited(&principal.0, now as u64) {
        state.audit_log.record(&AuditEntry {
            ts: now,
            trace_id: current_trace_id(),
            principal: principal.0.clone(),
            path,
            action: "rate_limited".to_string(),
            reason: None,
            detail: None,
        });
        return Err(ApiError::rate_limited());
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for Principal
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(ApiError::unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::server::AppState;
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState::for_test(AppConfig::default_for_test())
    }

    #[tokio::test]
    async fn api_key_header_authenticates_as_api_key_principal() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "test-api-key".parse().unwrap());

        let principal = authenticate(&state, &headers, 1_000_000).await.unwrap();
        assert_eq!(principal.0, API_KEY_PRINCIPAL);
    }

    #[tokio::test]
    async fn agent_key_header_is_accepted_as_an_alias() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert("x-agent-key", "test-api-key".parse().unwrap());

        assert!(authenticate(&state, &headers, 1_000_000).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_api_key_is_denied() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "wrong-key".parse().unwrap());

        assert_eq!(authenticate(&state, &headers, 1_000_000).await, Err("invalid_api_key"));
    }

    #[tokio::test]
    async fn missing_credentials_are_denied() {
        let state = test_state();
        let headers = HeaderMap::new();
        assert_eq!(
            authenticate(&state, &headers, 1_000_000).await,
            Err("missing_credentials")
        );
    }

    #[tokio::test]
    async fn bearer_token_authenticates_once_then_is_replayed() {
        let state = test_state();
        let raw = token::issue("agent-1", &state.config.token_signing_key_current, 900, 1_000_000);
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {raw}").parse().unwrap(),
        );

        let first = authenticate(&state, &headers, 1_000_100).await.unwrap();
        assert_eq!(first.0, "agent-1");

        let second = authenticate(&state, &headers, 1_000_100).await;
        assert_eq!(second, Err("replay_detected"));
    }

    #[test]
    fn principal_equality_is_by_value() {
        assert_eq!(Principal("a".to_string()), Principal("a".to_string()));
    }
}
