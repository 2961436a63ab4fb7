//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
///
/// Every field has a default; `from_env()` overrides from
/// `AUTOCOMMIT_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Root directory for local working copies.
    pub repo_storage_path: PathBuf,
    /// Time-match loop tick interval. Must be <= 60s so a trigger
    /// minute cannot be skipped while the process is running.
    pub tick_interval: Duration,
    /// How often idle workers poll the queue for claimable jobs.
    pub queue_poll_interval: Duration,
    /// Number of concurrent execution workers.
    pub worker_count: usize,
    /// Maximum attempts per job before terminal failure.
    pub max_attempts: u32,
    /// First retry delay; doubles on each subsequent retry.
    pub retry_base_delay: Duration,
    /// Timeout for a single git command.
    pub git_timeout: Duration,
    /// Domain used to synthesize commit emails for users without one
    /// on record (`<username>@<provider_domain>`).
    pub provider_domain: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/autocommit.db"),
            repo_storage_path: PathBuf::from("./data/repos"),
            tick_interval: Duration::from_secs(60),
            queue_poll_interval: Duration::from_secs(1),
            worker_count: 4,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            git_timeout: Duration::from_secs(120),
            provider_domain: "github.com".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build a config from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env_path("AUTOCOMMIT_DB_PATH", defaults.db_path),
            repo_storage_path: env_path("AUTOCOMMIT_REPO_STORAGE", defaults.repo_storage_path),
            tick_interval: env_secs("AUTOCOMMIT_TICK_SECS", defaults.tick_interval),
            queue_poll_interval: env_secs("AUTOCOMMIT_POLL_SECS", defaults.queue_poll_interval),
            worker_count: env_parse("AUTOCOMMIT_WORKERS", defaults.worker_count),
            max_attempts: env_parse("AUTOCOMMIT_MAX_ATTEMPTS", defaults.max_attempts),
            retry_base_delay: env_secs("AUTOCOMMIT_RETRY_BASE_SECS", defaults.retry_base_delay),
            git_timeout: env_secs("AUTOCOMMIT_GIT_TIMEOUT_SECS", defaults.git_timeout),
            provider_domain: std::env::var("AUTOCOMMIT_PROVIDER_DOMAIN")
                .unwrap_or(defaults.provider_domain),
        }
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
