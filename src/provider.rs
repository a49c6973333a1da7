//! Adapter over the external provider CLI.
//!
//! The provider is an opaque child process invoked with an explicit argv;
//! its contract is purely the shape of stdout. One-shot `Command::output()`
//! calls are used rather than a long-lived stdin/stdout session, since each
//! provider invocation here is a single request/response rather than a
//! persistent session.
//!
//! Modeled as a trait rather than a set of free functions, so `AppState`
//! holds a `dyn Provider` and tests can substitute a fixture without
//! spawning a real process.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to spawn provider process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("provider exited with status {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
}

/// Capability-gated command surface the handlers invoke. The only
/// production implementation is [`CliProvider`]; tests may substitute any
/// other implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn invoke(&self, args: &[String]) -> Result<Vec<u8>, ProviderError>;
}

/// Invokes the configured provider binary as a child process with an
/// explicit argv, returning raw stdout bytes on success. Never leaks
/// stderr content beyond the error variant here, which the handler layer
/// discards before it reaches the client.
pub struct CliProvider {
    binary: String,
}

impl CliProvider {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl Provider for CliProvider {
    async fn invoke(&self, args: &[String]) -> Result<Vec<u8>, ProviderError> {
        let output = Command::new(&self.binary).args(args).output().await?;

        if !output.status.success() {
            return Err(ProviderError::NonZeroExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(output.stdout)
    }
}

/// Defensively parses provider stdout for a read call. Accepts a bare JSON
/// array, `{"messages":[...]}`, or `{"items":[...]}`; anything else —
/// including bare text — is treated as an empty result rather than
/// fabricating items from arbitrary output.
pub fn parse_read_items(stdout: &[u8]) -> Vec<Value> {
    let Ok(value) = serde_json::from_slice::<Value>(stdout) else {
        return Vec::new();
    };

    match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            if let Some(Value::Array(items)) = obj.remove("messages") {
                items
            } else if let Some(Value::Array(items)) = obj.remove("items") {
                items
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// Extracts the identifier a write call reports on stdout: the trimmed
/// text, or a `<kind>-<epoch-millis>` fallback when stdout is blank.
pub fn parse_write_identifier(stdout: &[u8], kind: &str, now_epoch_millis: i64) -> String {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        format!("{kind}-{now_epoch_millis}")
    } else {
        trimmed.to_string()
    }
}

/// A scriptable [`Provider`] fixture for handler and integration tests:
/// queues canned responses per call, in order, rather than spawning a real
/// subprocess. Not behind `#[cfg(test)]` so integration test binaries
/// (which link the library without `--cfg test`) can reach it too.
pub mod test_support {

    use super::*;
    use std::sync::Mutex;

    pub enum Scripted {
        Stdout(Vec<u8>),
        Err(ProviderError),
    }

    pub struct FakeProvider {
        responses: Mutex<std::collections::VecDeque<Scripted>>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeProvider {
        pub fn new(responses: Vec<Scripted>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn json(value: serde_json::Value) -> Scripted {
            Scripted::Stdout(value.to_string().into_bytes())
        }

        pub fn text(text: &str) -> Scripted {
            Scripted::Stdout(text.as_bytes().to_vec())
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn invoke(&self, args: &[String]) -> Result<Vec<u8>, ProviderError> {
            self.calls.lock().unwrap().push(args.to_vec());
            match self.responses.lock().unwrap().pop_front() {
                Some(Scripted::Stdout(bytes)) => Ok(bytes),
                Some(Scripted::Err(err)) => Err(err),
                None => Ok(Vec::new()),
            }
        }
    }
}
