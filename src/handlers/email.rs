//! Email handlers: unread listing and outbound reply/send.

use axum::extract::{Query, State};
use axum::http::Request;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::AuditEntry;
use crate::auth::Principal;
use crate::config::{AuthHandlingMode, ThreadContextMode};
use crate::error::{self, ApiError};
use crate::handlers::read_json_body;
use crate::models::{EmailItem, EmailWarning, RawEmailItem, Sensitivity, strip_quoted_context};
use crate::policy::clamps::clamp_email_days;
use crate::policy::recipients::is_allowed_recipient;
use crate::policy::redaction::is_auth_sensitive;
use crate::provider;
use crate::quota::ConsumeOutcome;
use crate::replay::now_unix;
use crate::server::AppState;
use crate::telemetry::current_trace_id;

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    days: Option<String>,
    #[serde(rename = "contextMode")]
    context_mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnreadResponse {
    days: u32,
    #[serde(rename = "contextMode")]
    context_mode: &'static str,
    count: usize,
    items: Vec<EmailItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<EmailWarning>,
}

fn resolve_context_mode(query: &Option<String>, configured: ThreadContextMode) -> ThreadContextMode {
    match query.as_deref() {
        Some("full_thread") => ThreadContextMode::FullThread,
        Some("latest_only") => ThreadContextMode::LatestOnly,
        _ => configured,
    }
}

fn auth_handling_mode_label(mode: AuthHandlingMode) -> &'static str {
    match mode {
        AuthHandlingMode::Block => "block",
        AuthHandlingMode::Warn => "warn",
    }
}

pub async fn unread(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<UnreadQuery>,
) -> Result<axum::Json<UnreadResponse>, ApiError> {
    let requested_days = query.days.as_deref().and_then(|v| v.parse::<i64>().ok());
    let days = clamp_email_days(requested_days, state.config.email.max_recent_days);
    let context_mode = resolve_context_mode(&query.context_mode, state.config.email.thread_context_mode);

    let args = vec![
        state.config.gmail_account_id.clone(),
        "unread".to_string(),
        "--days".to_string(),
        days.to_string(),
    ];
    let stdout = state.provider.invoke(&args)
        .await
        .map_err(|err| upstream_failure(&state, "/v1/email/unread", &err.to_string()))?;

    let raw_items: Vec<RawEmailItem> = provider::parse_read_items(&stdout)
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();

    let mut items = Vec::with_capacity(raw_items.len());
    let mut warnings = Vec::new();
    let mut blocked_count = 0usize;

    for raw in raw_items {
        let (snippet, body) = if context_mode == ThreadContextMode::LatestOnly {
            (strip_quoted_context(&raw.snippet), strip_quoted_context(&raw.body))
        } else {
            (raw.snippet.clone(), raw.body.clone())
        };

        let sensitive = is_auth_sensitive(&raw.subject, &snippet, &body);

        if sensitive {
            blocked_count += 1;
            if state.config.email.auth_handling_mode == AuthHandlingMode::Block {
                continue;
            }
            warnings.push(EmailWarning::auth_artifact(raw.id.clone(), raw.thread_id.clone()));
        }

        items.push(EmailItem {
            id: raw.id,
            thread_id: raw.thread_id,
            from: raw.from,
            to: raw.to,
            subject: raw.subject,
            snippet,
            body,
            internal_date: raw.internal_date,
            sensitivity: if sensitive {
                Sensitivity::AuthSensitive
            } else {
                Sensitivity::Normal
            },
        });
    }

    let context_mode_label = match context_mode {
        ThreadContextMode::FullThread => "full_thread",
        ThreadContextMode::LatestOnly => "latest_only",
    };

    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: current_trace_id(),
        principal: principal.0,
        path: "/v1/email/unread".to_string(),
        action: "email_unread".to_string(),
        reason: None,
        detail: Some(json!({
            "days": days,
            "contextMode": context_mode_label,
            "authHandlingMode": auth_handling_mode_label(state.config.email.auth_handling_mode),
            "blockedCount": blocked_count,
            "count": items.len(),
        })),
    });

    Ok(axum::Json(UnreadResponse {
        days,
        context_mode: context_mode_label,
        count: items.len(),
        items,
        warnings,
    }))
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    #[serde(rename = "threadId")]
    thread_id: String,
    to: String,
    subject: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    to: String,
    subject: String,
    body: String,
}

fn upstream_failure(state: &AppState, path: &str, code: &str) -> ApiError {
    let trace_id = current_trace_id();
    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: trace_id.clone(),
        principal: "unknown".to_string(),
        path: path.to_string(),
        action: "request_error".to_string(),
        reason: Some(code.to_string()),
        detail: None,
    });
    let err = ApiError::upstream_failure();
    match trace_id {
        Some(id) => err.with_extra(json!({ "traceId": id })),
        None => err,
    }
}

async fn consume_send_quota(state: &AppState) -> Result<(), ApiError> {
    let outcome = state
        .send_quota
        .consume(
            state.config.outbound.max_sends_per_hour,
            state.config.outbound.max_sends_per_day,
            chrono::Utc::now(),
        )
        .map_err(|err| upstream_failure(state, "/v1/email/send", &err.to_string()))?;

    match outcome {
        ConsumeOutcome::Ok => Ok(()),
        ConsumeOutcome::Denied(reason) => Err(error::quota_denial(reason)),
    }
}

pub async fn reply(
    State(state): State<AppState>,
    principal: Principal,
    request: Request<axum::body::Body>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let body: ReplyRequest = read_json_body(request, state.config.max_request_body_bytes).await?;

    if body.to.trim().is_empty() || body.subject.trim().is_empty() || body.body.trim().is_empty() {
        return Err(ApiError::missing_fields(&["to", "subject", "body"]));
    }
    if body.thread_id.trim().is_empty() {
        return Err(ApiError::missing_fields(&["threadId"]));
    }

    if !state.config.outbound.allow_reply_to_anyone
        && !is_allowed_recipient(
            &body.to,
            state.config.outbound.allow_all_recipients,
            &state.config.outbound.recipient_allowlist,
            &state.config.outbound.domain_allowlist,
        )
    {
        return Err(ApiError::recipient_not_allowed());
    }

    consume_send_quota(&state).await?;

    let args = vec![
        state.config.gmail_account_id.clone(),
        "reply".to_string(),
        body.thread_id.clone(),
        body.to.clone(),
        body.subject.clone(),
        body.body.clone(),
    ];
    let stdout = state.provider.invoke(&args)
        .await
        .map_err(|err| upstream_failure(&state, "/v1/email/reply", &err.to_string()))?;
    let id = provider::parse_write_identifier(&stdout, "email_reply", now_unix() * 1000);

    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: current_trace_id(),
        principal: principal.0,
        path: "/v1/email/reply".to_string(),
        action: "email_reply".to_string(),
        reason: None,
        detail: Some(json!({ "threadId": body.thread_id, "id": id })),
    });

    Ok(axum::Json(json!({ "id": id })))
}

pub async fn send(
    State(state): State<AppState>,
    principal: Principal,
    request: Request<axum::body::Body>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    if state.config.outbound.reply_only_default {
        return Err(ApiError::reply_only_mode());
    }

    let body: SendRequest = read_json_body(request, state.config.max_request_body_bytes).await?;
    if body.to.trim().is_empty() || body.subject.trim().is_empty() || body.body.trim().is_empty() {
        return Err(ApiError::missing_fields(&["to", "subject", "body"]));
    }

    if !is_allowed_recipient(
        &body.to,
        state.config.outbound.allow_all_recipients,
        &state.config.outbound.recipient_allowlist,
        &state.config.outbound.domain_allowlist,
    ) {
        return Err(ApiError::recipient_not_allowed());
    }

    consume_send_quota(&state).await?;

    let args = vec![
        state.config.gmail_account_id.clone(),
        "send".to_string(),
        body.to.clone(),
        body.subject.clone(),
        body.body.clone(),
    ];
    let stdout = state.provider.invoke(&args)
        .await
        .map_err(|err| upstream_failure(&state, "/v1/email/send", &err.to_string()))?;
    let id = provider::parse_write_identifier(&stdout, "email_send", now_unix() * 1000);

    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: current_trace_id(),
        principal: principal.0,
        path: "/v1/email/send".to_string(),
        action: "email_send".to_string(),
        reason: None,
        detail: Some(json!({ "id": id })),
    });

    Ok(axum::Json(json!({ "id": id })))
}
