//! Liveness and deny-by-default fallback handlers.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::replay;
use crate::server::AppState;

/// Liveness probe. Additionally reports whether the replay directory is
/// writable — a diagnostic only, never consulted by the admission
/// pipeline.
pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let data_dir_writable = replay::is_writable(&state.paths.replay_dir);
    Json(json!({ "ok": true, "dataDirWritable": data_dir_writable }))
}

/// Catches every route not explicitly registered.
pub async fn not_found() -> ApiError {
    ApiError::deny_by_default()
}
