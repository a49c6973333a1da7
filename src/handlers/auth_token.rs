//! `POST /v1/auth/token` — mints a bearer token for an API-key caller.
//! Deliberately outside the admission middleware: minting is the one
//! route an API key alone may call without a prior token.

use axum::extract::{Request, State};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::handlers::read_json_body;
use crate::replay::now_unix;
use crate::server::AppState;
use crate::token;

#[derive(Debug, Deserialize)]
struct MintRequest {
    sub: String,
}

#[derive(Debug, Serialize)]
struct MintResponse {
    token: String,
    #[serde(rename = "ttlSeconds")]
    ttl_seconds: i64,
}

fn extract_api_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-api-key")
        .or_else(|| request.headers().get("x-agent-key"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn mint(State(state): State<AppState>, request: Request) -> Result<axum::Json<MintResponse>, ApiError> {
    let candidate = extract_api_key(&request).ok_or_else(ApiError::unauthorized)?;
    let matches: bool =
        ConstantTimeEq::ct_eq(candidate.as_bytes(), state.config.api_key.as_bytes()).into();
    if !matches {
        return Err(ApiError::unauthorized());
    }

    let body: MintRequest = read_json_body(request, state.config.max_request_body_bytes).await?;
    if body.sub.trim().is_empty() {
        return Err(ApiError::missing_fields(&["sub"]));
    }

    let now = now_unix();
    let minted = token::issue(
        &body.sub,
        &state.config.token_signing_key_current,
        state.config.token_ttl_seconds,
        now,
    );

    Ok(axum::Json(MintResponse {
        token: minted,
        ttl_seconds: state.config.token_ttl_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let state = AppState::for_test(AppConfig::default_for_test());
        crate::server::create_app(state)
    }

    #[tokio::test]
    async fn mints_a_token_for_a_valid_api_key() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/auth/token")
                    .header("x-api-key", "test-api-key")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sub":"agent-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_wrong_api_key() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/auth/token")
                    .header("x-api-key", "wrong")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sub":"agent-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_empty_subject() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/auth/token")
                    .header("x-api-key", "test-api-key")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sub":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
