//! Rolling hour/day quota counters backed by a single JSON file and a
//! sibling lock file.
//!
//! The consume operation — acquire lock, load, roll over stale buckets,
//! check caps, increment, persist, release — is atomic with respect to
//! other processes sharing the same counter file: either the quota is
//! consumed and the caller is told `ok`, or nothing changed. The lock
//! guard releases on every exit path, including a panicking handler, via
//! `scopeguard`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

const LOCK_SPIN_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_SPIN_BUDGET: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterRecord {
    pub hour_key: String,
    pub day_key: String,
    pub hour_count: u32,
    pub day_count: u32,
}

impl Default for CounterRecord {
    fn default() -> Self {
        Self {
            hour_key: String::new(),
            day_key: String::new(),
            hour_count: 0,
            day_count: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("timed out waiting for counter lock")]
    LockTimeout,
    #[error("io error operating on counter file: {0}")]
    Io(#[from] io::Error),
    #[error("counter file contains invalid json: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Outcome of a `consume` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Ok,
    Denied(&'static str),
}

/// RAII guard around the exclusive-create lock file; removes it on every
/// exit path, including a panicking handler, via `scopeguard`.
type LockGuard = scopeguard::ScopeGuard<PathBuf, fn(PathBuf)>;

fn release_lock(path: PathBuf) {
    let _ = fs::remove_file(&path);
}

fn acquire_lock(path: &Path) -> Result<LockGuard, QuotaError> {
    let deadline = std::time::Instant::now() + LOCK_SPIN_BUDGET;
    loop {
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => return Ok(scopeguard::guard(path.to_path_buf(), release_lock)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if std::time::Instant::now() >= deadline {
                    return Err(QuotaError::LockTimeout);
                }
                sleep(LOCK_SPIN_INTERVAL);
            }
            Err(err) => return Err(QuotaError::Io(err)),
        }
    }
}

fn hour_key(now: DateTime<Utc>) -> String {
    format!(
        "{:04}-{:02}-{:02}-{:02}",
        now.year(),
        now.month(),
        now.day(),
        now.hour()
    )
}

fn day_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day())
}

/// A single rolling hour/day counter, persisted at `path`.
pub struct QuotaCounter {
    path: PathBuf,
    lock_path: PathBuf,
}

impl QuotaCounter {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = {
            let mut p = path.clone();
            let file_name = format!("{}.lock", path.file_name().unwrap().to_string_lossy());
            p.set_file_name(file_name);
            p
        };
        Self { path, lock_path }
    }

    fn load(&self) -> Result<CounterRecord, QuotaError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(CounterRecord::default()),
            Err(err) => Err(QuotaError::Io(err)),
        }
    }

    fn persist(&self, record: &CounterRecord) -> Result<(), QuotaError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(record)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Attempts to consume one unit against `hour_max`/`day_max`, rolling
    /// over stale buckets first. Atomic under the sibling lock file.
    pub fn consume(
        &self,
        hour_max: u32,
        day_max: u32,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, QuotaError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = acquire_lock(&self.lock_path)?;

        let mut record = self.load()?;
        let current_hour = hour_key(now);
        let current_day = day_key(now);

        if record.hour_key != current_hour {
            record.hour_key = current_hour;
            record.hour_count = 0;
        }
        if record.day_key != current_day {
            record.day_key = current_day;
            record.day_count = 0;
        }

        if record.hour_count >= hour_max {
            return Ok(ConsumeOutcome::Denied("hour_limit_exceeded"));
        }
        if record.day_count >= day_max {
            return Ok(ConsumeOutcome::Denied("day_limit_exceeded"));
        }

        record.hour_count += 1;
        record.day_count += 1;
        self.persist(&record)?;

        Ok(ConsumeOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap()
    }

    #[test]
    fn consume_increments_both_counts_and_allows_up_to_max() {
        let dir = tempfile::tempdir().unwrap();
        let counter = QuotaCounter::new(dir.path().join("send-counters.json"));

        for _ in 0..3 {
            assert_eq!(
                counter.consume(3, 100, fixed_now()).unwrap(),
                ConsumeOutcome::Ok
            );
        }
        assert_eq!(
            counter.consume(3, 100, fixed_now()).unwrap(),
            ConsumeOutcome::Denied("hour_limit_exceeded")
        );
    }

    #[test]
    fn day_limit_is_enforced_independently_of_hour_limit() {
        let dir = tempfile::tempdir().unwrap();
        let counter = QuotaCounter::new(dir.path().join("counters.json"));

        assert_eq!(counter.consume(100, 1, fixed_now()).unwrap(), ConsumeOutcome::Ok);
        assert_eq!(
            counter.consume(100, 1, fixed_now()).unwrap(),
            ConsumeOutcome::Denied("day_limit_exceeded")
        );
    }

    #[test]
    fn hour_rollover_resets_hour_count_but_not_day_count() {
        let dir = tempfile::tempdir().unwrap();
        let counter = QuotaCounter::new(dir.path().join("counters.json"));

        assert_eq!(counter.consume(1, 100, fixed_now()).unwrap(), ConsumeOutcome::Ok);
        assert_eq!(
            counter.consume(1, 100, fixed_now()).unwrap(),
            ConsumeOutcome::Denied("hour_limit_exceeded")
        );

        let next_hour = fixed_now() + chrono::Duration::hours(1);
        assert_eq!(counter.consume(1, 100, next_hour).unwrap(), ConsumeOutcome::Ok);
    }

    #[test]
    fn concurrent_consume_admits_exactly_min_n_m() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(QuotaCounter::new(dir.path().join("counters.json")));
        let max = 5u32;
        let n = 20;

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    matches!(
                        counter.consume(max, 1000, fixed_now()),
                        Ok(ConsumeOutcome::Ok)
                    )
                })
            })
            .collect();

        let successes = handles.into_iter().filter(|h| h.join().unwrap()).count();
        assert_eq!(successes as u32, max.min(n as u32));
    }
}
