//! Configuration loading for the secure wrapper.
//!
//! The canonical configuration lives in a JSON file on disk
//! (`config/wrapper-config.json` under the data directory);
//! `SECURE_WRAPPER_*` environment variables redirect individual paths,
//! principally for tests. `.env`/`.env.local` files are consulted in the
//! same layered way, for convenience in local development only — they
//! never substitute for the JSON policy file itself.

use std::{collections::BTreeMap, env, fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the email handler treats messages classified `auth_sensitive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthHandlingMode {
    Block,
    Warn,
}

/// How much quoted/forwarded context is preserved in unread email bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadContextMode {
    FullThread,
    LatestOnly,
}

/// Value passed through to the provider's `sendUpdates` parameter on
/// calendar-mutating calls. Always taken from policy, never from the
/// request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SendUpdates {
    None,
    All,
    ExternalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPolicy {
    pub max_recent_days: u32,
    pub auth_handling_mode: AuthHandlingMode,
    pub thread_context_mode: ThreadContextMode,
}

impl Default for EmailPolicy {
    fn default() -> Self {
        Self {
            max_recent_days: 7,
            auth_handling_mode: AuthHandlingMode::Block,
            thread_context_mode: ThreadContextMode::FullThread,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarReadPolicy {
    pub default_this_week: bool,
    pub max_past_days: u32,
    pub max_future_days: u32,
    pub allow_attendee_emails: bool,
    pub allow_location: bool,
    pub allow_meeting_urls: bool,
}

impl Default for CalendarReadPolicy {
    fn default() -> Self {
        Self {
            default_this_week: true,
            max_past_days: 30,
            max_future_days: 30,
            allow_attendee_emails: false,
            allow_location: false,
            allow_meeting_urls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarWritePolicy {
    pub enabled: bool,
    #[serde(default)]
    pub allowed_calendar_ids: Vec<String>,
    pub allow_attendees: bool,
    pub send_updates: SendUpdates,
    pub max_events_per_hour: u32,
    pub max_events_per_day: u32,
}

impl Default for CalendarWritePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_calendar_ids: Vec::new(),
            allow_attendees: false,
            send_updates: SendUpdates::None,
            max_events_per_hour: 10,
            max_events_per_day: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPolicy {
    pub reply_only_default: bool,
    pub allow_all_recipients: bool,
    pub allow_reply_to_anyone: bool,
    #[serde(default)]
    pub recipient_allowlist: Vec<String>,
    #[serde(default)]
    pub domain_allowlist: Vec<String>,
    pub max_sends_per_hour: u32,
    pub max_sends_per_day: u32,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self {
            reply_only_default: true,
            allow_all_recipients: false,
            allow_reply_to_anyone: false,
            recipient_allowlist: Vec::new(),
            domain_allowlist: Vec::new(),
            max_sends_per_hour: 10,
            max_sends_per_day: 50,
        }
    }
}

/// Immutable-at-runtime policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub token_signing_key_current: String,
    #[serde(default)]
    pub token_signing_key_previous: String,
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: i64,
    #[serde(default)]
    pub gmail_account_id: String,
    #[serde(default = "default_provider_binary")]
    pub provider_binary: String,
    #[serde(default)]
    pub allowed_calendar_ids: Vec<String>,
    #[serde(default)]
    pub email: EmailPolicy,
    #[serde(default = "CalendarReadPolicy::default")]
    pub calendar_read: CalendarReadPolicy,
    #[serde(default = "CalendarWritePolicy::default")]
    pub calendar_write: CalendarWritePolicy,
    #[serde(default = "OutboundPolicy::default")]
    pub outbound: OutboundPolicy,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_request_body_bytes: default_max_request_body_bytes(),
            requests_per_minute: default_requests_per_minute(),
            api_key: String::new(),
            token_signing_key_current: String::new(),
            token_signing_key_previous: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
            gmail_account_id: String::new(),
            provider_binary: default_provider_binary(),
            allowed_calendar_ids: Vec::new(),
            email: EmailPolicy::default(),
            calendar_read: CalendarReadPolicy::default(),
            calendar_write: CalendarWritePolicy::default(),
            outbound: OutboundPolicy::default(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_max_request_body_bytes() -> usize {
    256 * 1024
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_token_ttl_seconds() -> i64 {
    900
}

fn default_provider_binary() -> String {
    "provider-cli".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl AppConfig {
    /// Socket address the server binds to.
    pub fn bind_addr(&self) -> Result<std::net::SocketAddr, std::net::AddrParseError> {
        self.bind_addr.parse()
    }

    /// JSON representation with every secret replaced by a fixed placeholder,
    /// safe to log at startup.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            for key in ["apiKey", "tokenSigningKeyCurrent", "tokenSigningKeyPrevious"] {
                if obj.contains_key(key) {
                    obj.insert(key.to_string(), serde_json::Value::String("[redacted]".to_string()));
                }
            }
        }
        serde_json::to_string_pretty(&value)
    }

    /// Validates the hard startup invariants: the API key
    /// and the current signing key must be non-empty, and numeric policy
    /// bounds must be sane. Called once by [`ConfigLoader::load`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::EmptySecret { field: "apiKey" });
        }
        if self.token_signing_key_current.trim().is_empty() {
            return Err(ConfigError::EmptySecret {
                field: "tokenSigningKeyCurrent",
            });
        }
        if self.email.max_recent_days < 1 {
            return Err(ConfigError::InvalidBound {
                field: "email.maxRecentDays",
                reason: "must be >= 1",
            });
        }
        if self.bind_addr().is_err() {
            return Err(ConfigError::InvalidBindAddr {
                value: self.bind_addr.clone(),
            });
        }
        Ok(())
    }

    /// A fully valid configuration for unit/integration tests, with a
    /// throwaway API key and signing key so `validate()` passes.
    pub fn default_for_test() -> Self {
        Self {
            api_key: "test-api-key".to_string(),
            token_signing_key_current: "test-signing-key-current".to_string(),
            token_signing_key_previous: String::new(),
            gmail_account_id: "agent@example.com".to_string(),
            allowed_calendar_ids: vec!["primary".to_string()],
            ..Self::default()
        }
    }
}

/// Filesystem layout for persisted state, resolved from the data directory
/// and any `SECURE_WRAPPER_*` overrides.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub config_path: PathBuf,
    pub audit_path: PathBuf,
    pub replay_dir: PathBuf,
    pub send_counter_path: PathBuf,
    pub calendar_counter_path: PathBuf,
}

impl DataPaths {
    pub fn resolve(data_dir: &Path) -> Self {
        let config_path = env::var("SECURE_WRAPPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("config").join("wrapper-config.json"));
        let audit_path = env::var("SECURE_WRAPPER_AUDIT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("logs").join("audit.jsonl"));
        let replay_dir = env::var("SECURE_WRAPPER_REPLAY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("logs").join("token-replay"));
        let send_counter_path = env::var("SECURE_WRAPPER_RATE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("logs").join("send-counters.json"));
        let calendar_counter_path = env::var("SECURE_WRAPPER_CALENDAR_RATE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("logs").join("calendar-counters.json"));

        Self {
            config_path,
            audit_path,
            replay_dir,
            send_counter_path,
            calendar_counter_path,
        }
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid bind address '{value}'")]
    InvalidBindAddr { value: String },
    #[error("required secret '{field}' must not be empty")]
    EmptySecret { field: &'static str },
    #[error("invalid value for '{field}': {reason}")]
    InvalidBound {
        field: &'static str,
        reason: &'static str,
    },
}

/// Loads [`AppConfig`] from the JSON policy file, applying `.env`-style
/// local overrides to the data-directory path first.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration, returning both the policy and the
    /// resolved data-directory paths.
    pub fn load(&self) -> Result<(AppConfig, DataPaths), ConfigError> {
        self.merge_dotenv(self.base_dir.join(".env"))?;
        self.merge_dotenv(self.base_dir.join(".env.local"))?;

        let data_dir = env::var("SECURE_WRAPPER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.base_dir.join("data"));
        let paths = DataPaths::resolve(&data_dir);

        let contents = fs::read_to_string(&paths.config_path).map_err(|source| ConfigError::Read {
            path: paths.config_path.clone(),
            source,
        })?;
        let config: AppConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: paths.config_path.clone(),
                source,
            })?;
        config.validate()?;

        Ok((config, paths))
    }

    /// Merges a `.env`-style file's `SECURE_WRAPPER_*`-prefixed keys into
    /// the process environment, without overwriting variables already set.
    fn merge_dotenv(&self, path: PathBuf) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                let mut values: BTreeMap<String, String> = BTreeMap::new();
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    values.insert(key, value);
                }
                for (key, value) in values {
                    if env::var(&key).is_err() {
                        unsafe { env::set_var(key, value) };
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_for_test_validates() {
        assert!(AppConfig::default_for_test().validate().is_ok());
    }

    #[test]
    fn empty_api_key_fails_validation() {
        let mut config = AppConfig::default_for_test();
        config.api_key = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptySecret { field: "apiKey" })
        ));
    }

    #[test]
    fn empty_signing_key_fails_validation() {
        let mut config = AppConfig::default_for_test();
        config.token_signing_key_current = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptySecret {
                field: "tokenSigningKeyCurrent"
            })
        ));
    }

    #[test]
    fn zero_max_recent_days_fails_validation() {
        let mut config = AppConfig::default_for_test();
        config.email.max_recent_days = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBound { field: "email.maxRecentDays", .. })
        ));
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let config = AppConfig::default_for_test();
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("test-api-key"));
        assert!(json.contains("[redacted]"));
    }

    #[test]
    fn load_reads_json_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("data").join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("wrapper-config.json"),
            serde_json::to_string(&AppConfig::default_for_test()).unwrap(),
        )
        .unwrap();

        let loader = ConfigLoader::with_base_dir(dir.path().to_path_buf());
        let (config, paths) = loader.load().unwrap();
        assert_eq!(config.api_key, "test-api-key");
        assert_eq!(paths.config_path, config_dir.join("wrapper-config.json"));
    }
}
