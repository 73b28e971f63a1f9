//! # Worker Configuration
//!
//! Configuration management for the sync worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILLSYNC_API_BASE_URL=https://pos.example.com/api                  │
//! │     TILLSYNC_API_TOKEN=...                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/tillsync/worker.toml (Linux)                             │
//! │     ~/Library/Application Support/com.tillsync.tillsync/worker.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [api]
//! base_url = "https://pos.example.com/api"
//! token = "secret"
//! per_page = 100
//!
//! [sync]
//! interval_secs = 300
//! lookback_hours = 48
//! deletion_confirmations = 2
//!
//! [database]
//! path = "/var/lib/tillsync/cache.db"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::fetcher::FetchSettings;
use crate::orchestrator::PassSettings;
use crate::scheduler::SchedulerSettings;
use tillsync_core::{DeletionPolicy, DEFAULT_DELETION_CONFIRMATIONS, DEFAULT_LOOKBACK_HOURS};
use tillsync_db::DbConfig;

// =============================================================================
// API Token
// =============================================================================

/// Bearer credential for the vendor API. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        ApiToken(token.into())
    }

    /// Returns the raw token for the Authorization header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken([redacted])")
    }
}

// =============================================================================
// Upstream API Settings
// =============================================================================

/// Vendor API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL; `/transactions` is appended.
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub token: ApiToken,

    /// Records requested per page.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Budget for one HTTP request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per page, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration (milliseconds) between attempts.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) between attempts.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Upper bound on pages per pass.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_per_page() -> u32 {
    100
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}
fn default_max_pages() -> u32 {
    10_000
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: String::new(),
            token: ApiToken::default(),
            per_page: default_per_page(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_pages: default_max_pages(),
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Pass and schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Seconds between scheduled passes.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Hours re-fetched behind the newest cached transaction.
    #[serde(default = "default_lookback")]
    pub lookback_hours: u32,

    /// Consecutive eligible misses before a row is deleted.
    #[serde(default = "default_confirmations")]
    pub deletion_confirmations: u32,

    /// Budget for a whole pass (seconds).
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// Budget for one cache statement (milliseconds).
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,

    /// Every Nth pass fetches full history. 0 disables.
    #[serde(default = "default_full_resync_every")]
    pub full_resync_every: u32,
}

fn default_interval() -> u64 {
    300
}
fn default_lookback() -> u32 {
    DEFAULT_LOOKBACK_HOURS
}
fn default_confirmations() -> u32 {
    DEFAULT_DELETION_CONFIRMATIONS
}
fn default_pass_timeout() -> u64 {
    600
}
fn default_statement_timeout() -> u64 {
    5_000
}
fn default_full_resync_every() -> u32 {
    288
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_interval(),
            lookback_hours: default_lookback(),
            deletion_confirmations: default_confirmations(),
            pass_timeout_secs: default_pass_timeout(),
            statement_timeout_ms: default_statement_timeout(),
            full_resync_every: default_full_resync_every(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Local cache location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("cache.db"))
        .unwrap_or_else(|| PathBuf::from("tillsync-cache.db"))
}

fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Worker Configuration
// =============================================================================

/// Complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl WorkerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`worker.toml`)
    /// 3. Environment variables
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        match config_path {
            Some(path) => {
                info!(?path, "Loading worker config from file");
                config = Self::from_file(&path)?;
            }
            None => match Self::default_config_path() {
                Some(path) if path.exists() => {
                    info!(?path, "Loading worker config from file");
                    config = Self::from_file(&path)?;
                }
                path => debug!(?path, "Config file not found, using defaults"),
            },
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(&self.api.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "API base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.token.is_empty() {
            return Err(SyncError::InvalidConfig("api.token must be set".into()));
        }

        let positive = [
            ("api.per_page", u64::from(self.api.per_page)),
            ("api.request_timeout_secs", self.api.request_timeout_secs),
            ("api.max_attempts", u64::from(self.api.max_attempts)),
            ("api.max_pages", u64::from(self.api.max_pages)),
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.deletion_confirmations", u64::from(self.sync.deletion_confirmations)),
            ("sync.pass_timeout_secs", self.sync.pass_timeout_secs),
            ("sync.statement_timeout_ms", self.sync.statement_timeout_ms),
            ("database.max_connections", u64::from(self.database.max_connections)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SyncError::InvalidConfig(format!(
                "{} must be greater than 0",
                name
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TILLSYNC_API_BASE_URL") {
            debug!(url = %url, "Overriding API base URL from environment");
            self.api.base_url = url;
        }

        if let Some(token) = lookup("TILLSYNC_API_TOKEN") {
            debug!("Overriding API token from environment");
            self.api.token = ApiToken::new(token);
        }

        if let Some(path) = lookup("TILLSYNC_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = parsed(&lookup, "TILLSYNC_INTERVAL_SECS") {
            self.sync.interval_secs = value;
        }

        if let Some(value) = parsed(&lookup, "TILLSYNC_LOOKBACK_HOURS") {
            self.sync.lookback_hours = value;
        }

        if let Some(value) = parsed(&lookup, "TILLSYNC_DELETION_CONFIRMATIONS") {
            self.sync.deletion_confirmations = value;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("worker.toml"))
    }

    // =========================================================================
    // Component Settings
    // =========================================================================

    pub fn deletion_policy(&self) -> SyncResult<DeletionPolicy> {
        DeletionPolicy::new(self.sync.deletion_confirmations)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            per_page: self.api.per_page,
            max_attempts: self.api.max_attempts,
            initial_backoff: Duration::from_millis(self.api.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.api.max_backoff_secs),
            max_pages: self.api.max_pages,
        }
    }

    pub fn pass_settings(&self) -> PassSettings {
        PassSettings {
            lookback: chrono::Duration::hours(i64::from(self.sync.lookback_hours)),
            statement_timeout: Duration::from_millis(self.sync.statement_timeout_ms),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_secs(self.sync.interval_secs),
            pass_timeout: Duration::from_secs(self.sync.pass_timeout_secs),
            full_resync_every: self.sync.full_resync_every,
        }
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "tillsync", "tillsync")
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => {
            debug!(key, value = %raw, "Overriding setting from environment");
            Some(value)
        }
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> WorkerConfig {
        let mut config = WorkerConfig::default();
        config.api.base_url = "https://pos.example.com/api".into();
        config.api.token = ApiToken::new("secret");
        config
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.api.per_page, 100);
        assert_eq!(config.sync.deletion_confirmations, 2);
        assert_eq!(config.sync.lookback_hours, 48);
        assert!(config.database.path.to_string_lossy().ends_with("cache.db"));
    }

    #[test]
    fn test_config_validation() {
        assert!(valid().validate().is_ok());

        // Missing URL and token
        assert!(WorkerConfig::default().validate().is_err());

        let mut config = valid();
        config.api.base_url = "ftp://pos.example.com".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        let mut config = valid();
        config.api.token = ApiToken::new("  ");
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let mut config = valid();
        config.sync.deletion_confirmations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync.deletion_confirmations"));
    }

    #[test]
    fn test_token_is_redacted() {
        let config = valid();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("[redacted]"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("TILLSYNC_API_BASE_URL", "http://localhost:9000"),
            ("TILLSYNC_API_TOKEN", "from-env"),
            ("TILLSYNC_INTERVAL_SECS", "60"),
            ("TILLSYNC_DELETION_CONFIRMATIONS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = valid();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api.base_url, "http://localhost:9000");
        assert_eq!(config.api.token.expose(), "from-env");
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(config.sync.deletion_confirmations, 2);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [api]
            base_url = "https://pos.example.com/api"
            token = "secret"
            per_page = 50

            [sync]
            lookback_hours = 12
            full_resync_every = 0

            [database]
            path = "/tmp/tillsync-test.db"
            "#
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.per_page, 50);
        assert_eq!(config.api.max_attempts, 5);
        assert_eq!(config.sync.lookback_hours, 12);
        assert_eq!(config.sync.full_resync_every, 0);
        assert_eq!(config.database.path, PathBuf::from("/tmp/tillsync-test.db"));

        assert_eq!(config.pass_settings().lookback, chrono::Duration::hours(12));
        assert_eq!(config.fetch_settings().per_page, 50);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = WorkerConfig::load(Some(PathBuf::from("/nonexistent/worker.toml"))).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_malformed_toml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api\nbase_url = ").unwrap();
        assert!(matches!(
            WorkerConfig::from_file(file.path()),
            Err(SyncError::ConfigLoadFailed(_))
        ));
    }
}
