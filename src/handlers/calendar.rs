//! Calendar handlers: read listing and write create/update.

use axum::extract::{Path, Query, State};
use axum::http::Request;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::AuditEntry;
use crate::auth::Principal;
use crate::config::SendUpdates;
use crate::error::{self, ApiError};
use crate::handlers::read_json_body;
use crate::models::{CalendarEvent, RawCalendarEvent};
use crate::policy::clamps::{clamp_calendar_range, is_writable_calendar_id, resolve_read_calendar_ids};
use crate::provider;
use crate::quota::ConsumeOutcome;
use crate::replay::now_unix;
use crate::server::AppState;
use crate::telemetry::current_trace_id;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    start: Option<String>,
    end: Option<String>,
    calendars: Option<String>,
}

#[derive(Debug, Serialize)]
struct EventsResponse {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    calendars: Vec<String>,
    count: usize,
    items: Vec<CalendarEvent>,
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

pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<EventsQuery>,
) -> Result<axum::Json<EventsResponse>, ApiError> {
    let now = Utc::now();
    let requested_start = query.start.as_deref().and_then(|v| DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc));
    let requested_end = query.end.as_deref().and_then(|v| DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc));

    let range = clamp_calendar_range(
        requested_start,
        requested_end,
        state.config.calendar_read.max_past_days,
        state.config.calendar_read.max_future_days,
        state.config.calendar_read.default_this_week,
        now,
    );

    let calendar_ids = resolve_read_calendar_ids(query.calendars.as_deref(), &state.config.allowed_calendar_ids);

    let mut items = Vec::new();
    for calendar_id in &calendar_ids {
        let args = vec![
            state.config.gmail_account_id.clone(),
            "events".to_string(),
            calendar_id.clone(),
            range.start.to_rfc3339(),
            range.end.to_rfc3339(),
        ];
        let stdout = state.provider.invoke(&args)
            .await
            .map_err(|err| upstream_failure(&state, "/v1/calendar/events", &err.to_string()))?;

        let raw_events: Vec<RawCalendarEvent> = provider::parse_read_items(&stdout)
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        items.extend(raw_events.into_iter().map(|raw| {
            CalendarEvent::project(
                raw,
                state.config.calendar_read.allow_location,
                state.config.calendar_read.allow_meeting_urls,
                state.config.calendar_read.allow_attendee_emails,
            )
        }));
    }

    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: current_trace_id(),
        principal: principal.0,
        path: "/v1/calendar/events".to_string(),
        action: "calendar_events".to_string(),
        reason: None,
        detail: Some(json!({
            "start": range.start.to_rfc3339(),
            "end": range.end.to_rfc3339(),
            "calendars": calendar_ids,
            "count": items.len(),
            "allowLocation": state.config.calendar_read.allow_location,
            "allowMeetingUrls": state.config.calendar_read.allow_meeting_urls,
            "allowAttendeeEmails": state.config.calendar_read.allow_attendee_emails,
        })),
    });

    Ok(axum::Json(EventsResponse {
        start: range.start,
        end: range.end,
        count: items.len(),
        calendars: calendar_ids,
        items,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(rename = "calendarId")]
    calendar_id: String,
    summary: String,
    start: String,
    end: String,
    #[serde(default)]
    attendees: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    #[serde(rename = "calendarId")]
    calendar_id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(rename = "addAttendees", default)]
    add_attendees: Vec<serde_json::Value>,
}

fn send_updates_arg(value: SendUpdates) -> &'static str {
    match value {
        SendUpdates::None => "none",
        SendUpdates::All => "all",
        SendUpdates::ExternalOnly => "externalOnly",
    }
}

async fn consume_calendar_quota(state: &AppState) -> Result<(), ApiError> {
    let outcome = state
        .calendar_quota
        .consume(
            state.config.calendar_write.max_events_per_hour,
            state.config.calendar_write.max_events_per_day,
            Utc::now(),
        )
        .map_err(|err| upstream_failure(state, "/v1/calendar/events", &err.to_string()))?;

    match outcome {
        ConsumeOutcome::Ok => Ok(()),
        ConsumeOutcome::Denied(reason) => Err(error::quota_denial(reason)),
    }
}

pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    request: Request<axum::body::Body>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    if !state.config.calendar_write.enabled {
        return Err(ApiError::calendar_write_disabled());
    }

    let body: CreateRequest = read_json_body(request, state.config.max_request_body_bytes).await?;
    if body.calendar_id.trim().is_empty()
        || body.summary.trim().is_empty()
        || body.start.trim().is_empty()
        || body.end.trim().is_empty()
    {
        return Err(ApiError::missing_fields(&["calendarId", "summary", "start", "end"]));
    }

    if !is_writable_calendar_id(
        &body.calendar_id,
        &state.config.calendar_write.allowed_calendar_ids,
        &state.config.allowed_calendar_ids,
    ) {
        return Err(ApiError::calendar_not_allowed());
    }

    let attendees = if state.config.calendar_write.allow_attendees {
        body.attendees
    } else {
        Vec::new()
    };

    consume_calendar_quota(&state).await?;

    let payload = json!({
        "calendarId": body.calendar_id,
        "summary": body.summary,
        "start": body.start,
        "end": body.end,
        "attendees": attendees,
        "sendUpdates": send_updates_arg(state.config.calendar_write.send_updates),
    });
    let args = vec![
        state.config.gmail_account_id.clone(),
        "calendar-create".to_string(),
        payload.to_string(),
    ];
    let stdout = state.provider.invoke(&args)
        .await
        .map_err(|err| upstream_failure(&state, "/v1/calendar/events", &err.to_string()))?;
    let event_id = provider::parse_write_identifier(&stdout, "calendar_create", now_unix() * 1000);

    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: current_trace_id(),
        principal: principal.0,
        path: "/v1/calendar/events".to_string(),
        action: "calendar_create".to_string(),
        reason: None,
        detail: Some(json!({ "calendarId": body.calendar_id, "eventId": event_id, "id": event_id })),
    });

    Ok(axum::Json(json!({ "id": event_id })))
}

pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    request: Request<axum::body::Body>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    if !state.config.calendar_write.enabled {
        return Err(ApiError::calendar_write_disabled());
    }

    let body: UpdateRequest = read_json_body(request, state.config.max_request_body_bytes).await?;
    if body.calendar_id.trim().is_empty() {
        return Err(ApiError::missing_fields(&["calendarId"]));
    }

    if !is_writable_calendar_id(
        &body.calendar_id,
        &state.config.calendar_write.allowed_calendar_ids,
        &state.config.allowed_calendar_ids,
    ) {
        return Err(ApiError::calendar_not_allowed());
    }

    let add_attendees = if state.config.calendar_write.allow_attendees {
        body.add_attendees
    } else {
        Vec::new()
    };

    consume_calendar_quota(&state).await?;

    let payload = json!({
        "calendarId": body.calendar_id,
        "eventId": id,
        "summary": body.summary,
        "start": body.start,
        "end": body.end,
        "addAttendees": add_attendees,
        "sendUpdates": send_updates_arg(state.config.calendar_write.send_updates),
    });
    let args = vec![
        state.config.gmail_account_id.clone(),
        "calendar-update".to_string(),
        payload.to_string(),
    ];
    let stdout = state.provider.invoke(&args)
        .await
        .map_err(|err| upstream_failure(&state, "/v1/calendar/events", &err.to_string()))?;
    let event_id = provider::parse_write_identifier(&stdout, "calendar_update", now_unix() * 1000);

    state.audit_log.record(&AuditEntry {
        ts: now_unix(),
        trace_id: current_trace_id(),
        principal: principal.0,
        path: "/v1/calendar/events/{id}".to_string(),
        action: "calendar_update".to_string(),
        reason: None,
        detail: Some(json!({ "calendarId": body.calendar_id, "eventId": event_id, "id": event_id })),
    });

    Ok(axum::Json(json!({ "id": event_id })))
}
