//! Numeric/date range and calendar-identifier clamps.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

/// Clamps a requested `days` query value into `[1, max_recent_days]`.
/// Non-finite input (failed to parse, or not a finite number) is treated as
/// the maximum, matching the "non-numeric → max" testable property.
pub fn clamp_email_days(requested: Option<i64>, max_recent_days: u32) -> u32 {
    let max = max_recent_days.max(1);
    match requested {
        Some(value) if value >= 1 => (value as u64).min(max as u64) as u32,
        _ => max,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn end_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_hms_opt(23, 59, 59).unwrap().and_utc()
}

fn this_week_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days_since_monday = now.weekday().num_days_from_monday() as i64;
    let monday = start_of_day(now) - Duration::days(days_since_monday);
    let sunday_end = end_of_day(monday + Duration::days(6));
    (monday, sunday_end)
}

/// Computes the effective {start, end, min, max} calendar range: the
/// configured past/future bounds, a this-week fallback when both requested
/// bounds are absent and the policy prefers it, and clamping of any
/// requested bound that falls outside [min, max].
pub fn clamp_calendar_range(
    requested_start: Option<DateTime<Utc>>,
    requested_end: Option<DateTime<Utc>>,
    max_past_days: u32,
    max_future_days: u32,
    default_this_week: bool,
    now: DateTime<Utc>,
) -> CalendarRange {
    let min = start_of_day(now - Duration::days(max_past_days as i64));
    let max = end_of_day(now + Duration::days(max_future_days as i64));

    let (mut start, mut end) = match (requested_start, requested_end) {
        (None, None) if default_this_week => this_week_bounds(now),
        (None, None) => (min, max),
        (s, e) => (s.unwrap_or(min), e.unwrap_or(max)),
    };

    if start < min {
        start = min;
    }
    if end > max {
        end = max;
    }
    if end < start {
        end = start;
    }

    CalendarRange { start, end, min, max }
}

/// Parses a comma-separated calendar-id list from a query parameter,
/// falling back to `configured` when the query is absent or empty after
/// trimming, dropping, and de-duplicating.
pub fn resolve_read_calendar_ids(requested: Option<&str>, configured: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let parsed: Vec<String> = requested
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect();

    if parsed.is_empty() {
        configured.to_vec()
    } else {
        parsed
    }
}

/// Returns true if `calendar_id` may be used for a write: member of the
/// write allowlist (when non-empty) or of the configured read list.
pub fn is_writable_calendar_id(
    calendar_id: &str,
    write_allowlist: &[String],
    configured_read_list: &[String],
) -> bool {
    if !write_allowlist.is_empty() {
        write_allowlist.iter().any(|id| id == calendar_id)
    } else {
        configured_read_list.iter().any(|id| id == calendar_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_days_clamps_to_bounds() {
        assert_eq!(clamp_email_days(Some(0), 7), 7);
        assert_eq!(clamp_email_days(Some(-5), 7), 7);
        assert_eq!(clamp_email_days(Some(3), 7), 3);
        assert_eq!(clamp_email_days(Some(100), 7), 7);
        assert_eq!(clamp_email_days(None, 7), 7);
    }

    #[test]
    fn calendar_range_falls_back_to_this_week() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap(); // Tuesday
        let range = clamp_calendar_range(None, None, 30, 30, true, now);
        assert_eq!(range.start.weekday(), Weekday::Mon);
        assert_eq!(range.end.weekday(), Weekday::Sun);
        assert!(range.start <= now && now <= range.end);
    }

    #[test]
    fn calendar_range_falls_back_to_min_max_when_this_week_disabled() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let range = clamp_calendar_range(None, None, 5, 5, false, now);
        assert_eq!(range.start, range.min);
        assert_eq!(range.end, range.max);
    }

    #[test]
    fn out_of_bound_requested_range_is_clamped() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let too_early = now - Duration::days(400);
        let too_late = now + Duration::days(400);
        let range = clamp_calendar_range(Some(too_early), Some(too_late), 30, 30, true, now);
        assert_eq!(range.start, range.min);
        assert_eq!(range.end, range.max);
    }

    #[test]
    fn end_before_start_after_clamping_collapses_to_start() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let start = now + Duration::days(10);
        let end = now - Duration::days(10);
        let range = clamp_calendar_range(Some(start), Some(end), 30, 30, true, now);
        assert_eq!(range.end, range.start);
    }

    #[test]
    fn resolve_read_calendar_ids_parses_trims_and_dedupes() {
        let configured = vec!["primary".to_string()];
        let ids = resolve_read_calendar_ids(Some(" a, b ,a, ,b"), &configured);
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn resolve_read_calendar_ids_falls_back_when_absent_or_empty() {
        let configured = vec!["primary".to_string(), "work".to_string()];
        assert_eq!(resolve_read_calendar_ids(None, &configured), configured);
        assert_eq!(resolve_read_calendar_ids(Some(""), &configured), configured);
        assert_eq!(resolve_read_calendar_ids(Some(" , ,"), &configured), configured);
    }

    #[test]
    fn write_id_checks_write_allowlist_first_then_read_list() {
        let write_list = vec!["work".to_string()];
        let read_list = vec!["primary".to_string()];
        assert!(is_writable_calendar_id("work", &write_list, &read_list));
        assert!(!is_writable_calendar_id("primary", &write_list, &read_list));

        let empty_write: Vec<String> = Vec::new();
        assert!(is_writable_calendar_id("primary", &empty_write, &read_list));
    }
}
