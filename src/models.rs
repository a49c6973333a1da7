//! Normalized domain types returned to the agent: emails and calendar
//! events, shaped from whatever the provider adapter returns.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Normal,
    AuthSensitive,
}

/// Raw email item as returned by the provider adapter, before context
/// stripping or sensitivity classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEmailItem {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "internalDate", default)]
    pub internal_date: String,
}

/// Normalized email item returned to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct EmailItem {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    #[serde(rename = "internalDate")]
    pub internal_date: String,
    pub sensitivity: Sensitivity,
}

/// A warning entry attached when a sensitive message is surfaced anyway
/// under `authHandlingMode=warn`.
#[derive(Debug, Clone, Serialize)]
pub struct EmailWarning {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "wouldBlock")]
    pub would_block: bool,
    pub reason: &'static str,
    pub category: &'static str,
}

impl EmailWarning {
    pub fn auth_artifact(id: String, thread_id: String) -> Self {
        Self {
            id,
            thread_id,
            would_block: true,
            reason: "auth_artifact_detected",
            category: "auth_sensitive",
        }
    }
}

/// Scans `text` line by line and truncates at the first line that looks
/// like quoted or forwarded context, returning only the lines before that
/// marker.
pub fn strip_quoted_context(text: &str) -> String {
    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('>') {
            break;
        }
        if is_quote_header_fragment(trimmed) {
            break;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn is_quote_header_fragment(line: &str) -> bool {
    let lower = line.to_lowercase();
    if lower.starts_with("on ") && lower.contains("wrote:") {
        return true;
    }
    if lower.starts_with("from:") || lower.starts_with("sent:") {
        return true;
    }
    if lower.starts_with("subject:") || lower.starts_with("to:") {
        return true;
    }
    if lower.contains("original message") {
        return true;
    }
    if lower.starts_with("begin forwarded message:") {
        return true;
    }
    false
}

/// Raw calendar event as returned by the provider adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttendee {
    pub email: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "self", default)]
    pub self_: bool,
    #[serde(rename = "responseStatus", default)]
    pub response_status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCalendarEvent {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "hangoutLink", default)]
    pub hangout_link: Option<String>,
    #[serde(default)]
    pub attendees: Vec<RawAttendee>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attendee {
    pub email: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "self")]
    pub is_self: bool,
    #[serde(rename = "responseStatus")]
    pub response_status: String,
}

/// Normalized calendar event, privacy-projected per policy flags.
/// Fields are entirely absent from the serialized JSON when their gate
/// is off, rather than present-but-null.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: String,
    pub end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "hangoutLink", skip_serializing_if = "Option::is_none")]
    pub hangout_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<Attendee>>,
}

impl CalendarEvent {
    pub fn project(
        raw: RawCalendarEvent,
        allow_location: bool,
        allow_meeting_urls: bool,
        allow_attendee_emails: bool,
    ) -> Self {
        Self {
            id: raw.id,
            summary: raw.summary,
            start: raw.start,
            end: raw.end,
            location: if allow_location { raw.location } else { None },
            hangout_link: if allow_meeting_urls { raw.hangout_link } else { None },
            attendees: if allow_attendee_emails {
                Some(
                    raw.attendees
                        .into_iter()
                        .map(|a| Attendee {
                            email: a.email,
                            display_name: a.display_name,
                            is_self: a.self_,
                            response_status: a.response_status,
                        })
                        .collect(),
                )
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_quoted_context_truncates_at_quote_marker() {
        let text = "Sounds good.\n> On Tue, Alice wrote:\n> original text";
        assert_eq!(strip_quoted_context(text), "Sounds good.");
    }

    #[test]
    fn strip_quoted_context_truncates_at_on_wrote_header() {
        let text = "Thanks!\nOn Mon, Jan 1, 2026 at 9:00 AM Bob <bob@example.com> wrote:\nold content";
        assert_eq!(strip_quoted_context(text), "Thanks!");
    }

    #[test]
    fn strip_quoted_context_truncates_at_outlook_separator() {
        let text = "See below.\n-- Original Message --\nFrom: bob@example.com";
        assert_eq!(strip_quoted_context(text), "See below.");
    }

    #[test]
    fn strip_quoted_context_truncates_at_forwarded_marker() {
        let text = "FYI\nBegin forwarded message:\nFrom: carol@example.com";
        assert_eq!(strip_quoted_context(text), "FYI");
    }

    #[test]
    fn strip_quoted_context_keeps_entire_text_when_no_marker_present() {
        let text = "line one\nline two";
        assert_eq!(strip_quoted_context(text), text);
    }

    #[test]
    fn calendar_event_projection_hides_gated_fields() {
        let raw = RawCalendarEvent {
            id: "e1".to_string(),
            summary: "Standup".to_string(),
            start: "2026-07-28T09:00:00Z".to_string(),
            end: "2026-07-28T09:30:00Z".to_string(),
            location: Some("123 Main St".to_string()),
            hangout_link: Some("https://meet.google.com/abc".to_string()),
            attendees: vec![RawAttendee {
                email: "alice@example.com".to_string(),
                display_name: None,
                self_: true,
                response_status: "accepted".to_string(),
            }],
        };

        let projected = CalendarEvent::project(raw, false, false, true);
        assert!(projected.location.is_none());
        assert!(projected.hangout_link.is_none());
        let attendees = projected.attendees.unwrap();
        assert_eq!(attendees[0].email, "alice@example.com");

        let json = serde_json::to_string(&projected).unwrap();
        assert!(!json.contains("location"));
        assert!(!json.contains("hangoutLink"));
    }
}
