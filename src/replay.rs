//! One-time-use replay marker store.
//!
//! Markers are individual files under a dedicated directory, named after a
//! token's `jti` (already validated as safe by `token::is_safe_jti` before
//! it ever reaches this module). Installing a marker is an exclusive-create:
//! the filesystem itself provides the single-winner guarantee across
//! concurrent processes and across restarts, with no in-process lock
//! needed — the filesystem is the source of truth, generalized here
//! from an in-memory rate-limit map to a durable one-shot set.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Marker {
    exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay detected")]
    AlreadyUsed,
    #[error("io error installing replay marker: {0}")]
    Io(#[from] io::Error),
}

/// Tracks one-time-use token markers on disk and sweeps expired ones at
/// most once per minute per process.
pub struct ReplayStore {
    dir: PathBuf,
    last_swept_minute: AtomicI64,
}

impl ReplayStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            last_swept_minute: AtomicI64::new(i64::MIN),
        }
    }

    fn marker_path(&self, jti: &str) -> PathBuf {
        self.dir.join(format!("{jti}.json"))
    }

    /// Installs a marker for `jti`, failing if one already exists. This is
    /// the only mutual-exclusion primitive the replay store needs: exclusive
    /// create is atomic even across processes sharing the directory.
    pub fn install(&self, jti: &str, exp: i64, now: i64) -> Result<(), ReplayError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.marker_path(jti);
        let marker = Marker { exp };
        let bytes = serde_json::to_vec(&marker).expect("marker always serializes");

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(&bytes)?;
                self.maybe_sweep(now);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(ReplayError::AlreadyUsed),
            Err(err) => Err(ReplayError::Io(err)),
        }
    }

    /// Runs the sweep at most once per UTC minute per process.
    fn maybe_sweep(&self, now: i64) {
        let minute = now / 60;
        let previous = self.last_swept_minute.swap(minute, Ordering::SeqCst);
        if previous != minute {
            let _ = self.sweep(now);
        }
    }

    /// Deletes every marker that is expired or unparseable. Corrupt marker
    /// files are tolerated by deletion rather than surfaced as errors — a
    /// malformed marker can never prove anything about replay.
    pub fn sweep(&self, now: i64) -> io::Result<usize> {
        let mut removed = 0;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let should_remove = match fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<Marker>(&contents) {
                    Ok(marker) => marker.exp <= now,
                    Err(_) => true,
                },
                Err(_) => true,
            };
            if should_remove && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Returns true if `dir` exists and a test write succeeds, used by the
/// `/healthz` diagnostic — purely informational, never consulted by
/// admission.
pub fn is_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".writable-probe");
    let ok = fs::write(&probe, b"ok").is_ok();
    let _ = fs::remove_file(&probe);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_install_succeeds_second_is_replay() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReplayStore::new(dir.path().to_path_buf());

        store.install("abc123def456abcd", 1_000_900, 1_000_000).unwrap();
        let err = store.install("abc123def456abcd", 1_000_900, 1_000_000).unwrap_err();
        assert!(matches!(err, ReplayError::AlreadyUsed));
    }

    #[test]
    fn sweep_removes_expired_markers_and_keeps_live_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReplayStore::new(dir.path().to_path_buf());

        store.install("expiredtokenid1", 100, 0).unwrap();
        store.install("livetokenidaaaa", 10_000, 0).unwrap();

        let removed = store.sweep(5_000).unwrap();
        assert_eq!(removed, 1);
        assert!(!store.marker_path("expiredtokenid1").exists());
        assert!(store.marker_path("livetokenidaaaa").exists());
    }

    #[test]
    fn sweep_tolerates_corrupt_marker_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("corrupttoken1.json"), b"not json").unwrap();

        let store = ReplayStore::new(dir.path().to_path_buf());
        let removed = store.sweep(1_000).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn concurrent_installs_of_same_jti_admit_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReplayStore::new(dir.path().to_path_buf()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.install("racingtokenid12", 1_000_900, 1_000_000).is_ok())
            })
            .collect();

        let successes = handles.into_iter().filter(|h| h.join().unwrap()).count();
        assert_eq!(successes, 1);
    }
}
