//! Bearer token issuance and verification.
//!
//! Tokens look like a JWT (`header.payload.signature`, base64url parts) but
//! are deliberately hand-rolled rather than built on a general JWT library:
//! the verifier must always use HMAC-SHA256 regardless of what the header's
//! `alg` field claims, which a generic "consult the header to pick a
//! verifier" JWT implementation would not enforce by construction. The
//! header is emitted for interoperability/debuggability but never consulted
//! on verify.

use hmac::{Hmac, Mac};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Fixed audience embedded in every token and checked on every admission.
pub const AUDIENCE: &str = "secure-wrapper/v1";

/// Maximum allowed clock skew for a token's `iat` claim.
const IAT_SKEW_SECONDS: i64 = 10;

fn jti_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-f0-9-]{16,64}$").expect("valid jti regex"))
}

/// Returns true if `candidate` is a safe jti: matching `[a-f0-9-]{16,64}`
/// guarantees it can never escape the replay-marker directory or name a
/// special file.
pub fn is_safe_jti(candidate: &str) -> bool {
    jti_pattern().is_match(candidate)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            alg: "HS256",
            typ: "JWT",
        }
    }
}

/// The decoded and validated claim set of a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub aud: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature verification failed")]
    BadSignature,
    #[error("token is expired")]
    Expired,
    #[error("issued-at is too far in the future")]
    IssuedInFuture,
    #[error("subject claim is empty")]
    EmptySubject,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("jti fails safe-name validation")]
    UnsafeJti,
}

fn b64_encode(bytes: &[u8]) -> String {
    base64_url::encode(bytes)
}

fn b64_decode(s: &str) -> Option<Vec<u8>> {
    base64_url::decode(s).ok()
}

fn hmac_sign(key: &str, signing_input: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(signing_input.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Issues a fresh token for `subject`, signed with `signing_key`, valid for
/// `ttl_seconds` from `now`.
pub fn issue(subject: &str, signing_key: &str, ttl_seconds: i64, now: i64) -> String {
    let header = Header::default();
    let jti = uuid::Uuid::new_v4().to_string();
    let claims = Claims {
        sub: subject.to_string(),
        iat: now,
        exp: now + ttl_seconds,
        jti,
        aud: AUDIENCE.to_string(),
    };

    let header_b64 = b64_encode(&serde_json::to_vec(&header).expect("header always serializes"));
    let payload_b64 = b64_encode(&serde_json::to_vec(&claims).expect("claims always serialize"));
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = hmac_sign(signing_key, &signing_input);
    let signature_b64 = b64_encode(&signature);

    format!("{signing_input}.{signature_b64}")
}

/// Verifies `token` against `current` (and `previous`, if non-empty)
/// signing keys, then validates every claim. Returns the decoded claims
/// only once every invariant holds — the caller (see `auth.rs`) is still
/// responsible for the replay check.
pub fn verify(token: &str, current: &str, previous: &str, now: i64) -> Result<Claims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        return Err(TokenError::Malformed);
    };

    let signing_input = format!("{header_b64}.{payload_b64}");
    let provided_signature = b64_decode(signature_b64).ok_or(TokenError::Malformed)?;

    let mut verified = false;
    for key in [current, previous] {
        if key.is_empty() {
            continue;
        }
        let expected = hmac_sign(key, &signing_input);
        if expected.ct_eq(&provided_signature).into() {
            verified = true;
            break;
        }
    }
    if !verified {
        return Err(TokenError::BadSignature);
    }

    let payload_bytes = b64_decode(payload_b64).ok_or(TokenError::Malformed)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    if claims.iat > now + IAT_SKEW_SECONDS {
        return Err(TokenError::IssuedInFuture);
    }
    if claims.sub.trim().is_empty() {
        return Err(TokenError::EmptySubject);
    }
    if claims.aud != AUDIENCE {
        return Err(TokenError::AudienceMismatch);
    }
    if !is_safe_jti(&claims.jti) {
        return Err(TokenError::UnsafeJti);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "current-signing-key";
    const OLD_KEY: &str = "previous-signing-key";

    #[test]
    fn round_trip_succeeds() {
        let token = issue("agent-1", KEY, 900, 1_000_000);
        let claims = verify(&token, KEY, "", 1_000_100).unwrap();
        assert_eq!(claims.sub, "agent-1");
        assert_eq!(claims.aud, AUDIENCE);
        assert!(is_safe_jti(&claims.jti));
    }

    #[test]
    fn verifies_under_previous_key_during_rotation() {
        let token = issue("agent-1", OLD_KEY, 900, 1_000_000);
        let claims = verify(&token, KEY, OLD_KEY, 1_000_100).unwrap();
        assert_eq!(claims.sub, "agent-1");
    }

    #[test]
    fn rejects_wrong_key() {
        let token = issue("agent-1", "wrong-key", 900, 1_000_000);
        assert_eq!(verify(&token, KEY, OLD_KEY, 1_000_100), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_expired_token() {
        let token = issue("agent-1", KEY, 10, 1_000_000);
        assert_eq!(verify(&token, KEY, "", 1_000_100), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_future_issued_at_beyond_skew() {
        let token = issue("agent-1", KEY, 900, 2_000_000);
        assert_eq!(verify(&token, KEY, "", 1_000_000), Err(TokenError::IssuedInFuture));
    }

    #[test]
    fn tolerates_small_skew() {
        let token = issue("agent-1", KEY, 900, 1_000_005);
        assert!(verify(&token, KEY, "", 1_000_000).is_ok());
    }

    #[test]
    fn rejects_malformed_shape() {
        assert_eq!(verify("not-a-token", KEY, "", 0), Err(TokenError::Malformed));
        assert_eq!(verify("a.b.c.d", KEY, "", 0), Err(TokenError::Malformed));
    }

    #[test]
    fn alg_header_is_never_consulted() {
        // Even a header claiming a different algorithm must still verify
        // under plain HMAC-SHA256 — there is no alternate code path to confuse.
        let header = serde_json::json!({"alg": "none", "typ": "JWT"});
        let header_b64 = base64_url::encode(&serde_json::to_vec(&header).unwrap());
        let claims = Claims {
            sub: "agent-1".to_string(),
            iat: 1_000_000,
            exp: 1_000_900,
            jti: "abcdef0123456789".to_string(),
            aud: AUDIENCE.to_string(),
        };
        let payload_b64 = base64_url::encode(&serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig = hmac_sign(KEY, &signing_input);
        let token = format!("{signing_input}.{}", base64_url::encode(&sig));

        assert!(verify(&token, KEY, "", 1_000_100).is_ok());
    }

    #[test]
    fn rejects_unsafe_jti() {
        let mut claims = Claims {
            sub: "agent-1".to_string(),
            iat: 1_000_000,
            exp: 1_000_900,
            jti: "../../etc/passwd".to_string(),
            aud: AUDIENCE.to_string(),
        };
        claims.jti = "../../etc/passwd".to_string();
        let header = Header::default();
        let header_b64 = base64_url::encode(&serde_json::to_vec(&header).unwrap());
        let payload_b64 = base64_url::encode(&serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig = hmac_sign(KEY, &signing_input);
        let token = format!("{signing_input}.{}", base64_url::encode(&sig));

        assert_eq!(verify(&token, KEY, "", 1_000_100), Err(TokenError::UnsafeJti));
    }

    #[test]
    fn empty_subject_is_rejected() {
        let token = issue("", KEY, 900, 1_000_000);
        assert_eq!(verify(&token, KEY, "", 1_000_100), Err(TokenError::EmptySubject));
    }

    #[test]
    fn safe_jti_regex_rejects_path_traversal() {
        assert!(!is_safe_jti("../../etc/passwd"));
        assert!(!is_safe_jti("short"));
        assert!(is_safe_jti(&uuid::Uuid::new_v4().to_string()));
    }
}
