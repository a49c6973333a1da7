//! Append-only audit log.
//!
//! One JSON object per line, opened in append mode for every write so
//! concurrent writers never clobber each other's entries (small writes to
//! a file opened `O_APPEND` are atomic on the platforms this runs on).
//! Audit entries are informational only — a write failure here is logged
//! through `tracing` and swallowed rather than surfaced to the caller,
//! since failing the in-flight request because the audit trail could not
//! be extended would make the log itself a new denial-of-service surface.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Renders a unix-seconds timestamp as an ISO-8601 UTC string on the wire,
/// so every audit line leads with a human-readable `ts` field.
fn serialize_ts<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = DateTime::<Utc>::from_timestamp(*ts, 0)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        .to_rfc3339();
    serializer.serialize_str(&formatted)
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    #[serde(serialize_with = "serialize_ts")]
    pub ts: i64,
    pub trace_id: Option<String>,
    pub principal: String,
    pub path: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Operation-specific fields (spec.md §4.8-4.13's per-action shapes,
    /// e.g. `{days, contextMode, ...}` for `email_unread`), flattened into
    /// the top-level object rather than nested under a `detail` key.
    #[serde(flatten)]
    pub detail: Option<Value>,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Appends `entry` as one JSON line. Errors are logged, never returned.
    pub fn record(&self, entry: &AuditEntry) {
        if let Err(err) = self.try_record(entry) {
            tracing::error!(error = %err, path = %self.path.display(), "failed to append audit entry");
        }
    }

    fn try_record(&self, entry: &AuditEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(entry).expect("audit entry always serializes");
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)
    }
}
