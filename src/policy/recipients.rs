//! Recipient allowlist: address normalization and fail-closed membership.

use std::sync::OnceLock;

use regex::Regex;

fn local_part_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9._%+-]+$").expect("valid local-part regex"))
}

fn domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9.-]+\.[a-z]{2,}$").expect("valid domain regex"))
}

/// Lowercases and trims `candidate`, then validates it has exactly one '@'
/// with a well-formed local part and domain. Rejects addresses containing
/// whitespace or more than one '@' (e.g. `victim@good.com@attacker.com`),
/// which a naive "does it contain the allowed domain" check would miss.
pub fn normalize_address(candidate: &str) -> Option<(String, String)> {
    let normalized = candidate.trim().to_lowercase();
    if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
        return None;
    }

    let mut parts = normalized.split('@');
    let local = parts.next()?;
    let domain = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    if !local_part_pattern().is_match(local) {
        return None;
    }
    if !domain_pattern().is_match(domain) {
        return None;
    }

    Some((format!("{local}@{domain}"), domain.to_string()))
}

/// Decision rules evaluated in order: allow-all override,
/// fail-closed when both lists are empty, exact-address match, then
/// domain match.
pub fn is_allowed_recipient(
    candidate: &str,
    allow_all_recipients: bool,
    recipient_allowlist: &[String],
    domain_allowlist: &[String],
) -> bool {
    if allow_all_recipients {
        return true;
    }
    if recipient_allowlist.is_empty() && domain_allowlist.is_empty() {
        return false;
    }

    let Some((normalized, domain)) = normalize_address(candidate) else {
        return false;
    };

    if recipient_allowlist
        .iter()
        .any(|entry| entry.trim().to_lowercase() == normalized)
    {
        return true;
    }
    if domain_allowlist
        .iter()
        .any(|entry| entry.trim().to_lowercase() == domain)
    {
        return true;
    }
    false
}
