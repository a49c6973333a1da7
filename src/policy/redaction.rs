//! Auth-sensitivity classifier: a compiled regex corpus covering three
//! phrasing families, matched case-insensitively against concatenated
//! subject/snippet/body text.

use std::sync::OnceLock;

use regex::RegexSet;

fn corpus() -> &'static RegexSet {
    static CORPUS: OnceLock<RegexSet> = OnceLock::new();
    CORPUS.get_or_init(|| {
        RegexSet::new([
            // OTP / verification / 2FA / login-code / authentication-code
            r"(?i)\b(otp|one[- ]time (pass code|passcode|code)|verification code|2fa|two[- ]factor|login code|authentication code)\b",
            // Password reset / sign-in attempt / approve sign-in
            r"(?i)\b(reset your password|password reset|sign[- ]in attempt|approve sign[- ]in|new sign[- ]in)\b",
            // Magic link / verify email / passkey / device verification
            r"(?i)\b(magic link|verify your email|passkey|device verification|confirm this device)\b",
        ])
        .expect("auth-sensitivity corpus always compiles")
    })
}

/// Returns true if the concatenation of `subject`, `snippet`, and `body`
/// matches any pattern in the auth-sensitivity corpus.
pub fn is_auth_sensitive(subject: &str, snippet: &str, body: &str) -> bool {
    let combined = format!("{subject} {snippet} {body}");
    corpus().is_match(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_otp_phrasing() {
        assert!(is_auth_sensitive("OTP 999999", "login code 999999", "code 999999"));
    }

    #[test]
    fn flags_password_reset_phrasing() {
        assert!(is_auth_sensitive("Reset your password", "", ""));
        assert!(is_auth_sensitive("", "", "Approve sign-in from new device"));
    }

    #[test]
    fn flags_magic_link_phrasing() {
        assert!(is_auth_sensitive("", "Click this magic link to continue", ""));
        assert!(is_auth_sensitive("Verify your email", "", ""));
    }

    #[test]
    fn leaves_ordinary_content_unflagged() {
        assert!(!is_auth_sensitive("hello", "normal", "full body"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_auth_sensitive("", "", "YOUR ONE-TIME PASSCODE IS 123456"));
    }
}
