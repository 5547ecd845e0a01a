//! Configuration types shared across crates.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Operations endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the health and metrics endpoint (e.g., "127.0.0.1:9480").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// Keep the ops listener off public interfaces.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:9480".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds a statement waits on a locked database before failing.
        /// SQLite cannot cancel a running statement; use PostgreSQL for hard timeouts.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database. Required when more than one scheduler runs.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password. Prefer SUNSET_METADATA__PASSWORD over the config file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(5)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/sunset.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Deletion lifecycle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Days an account stays recoverable before it becomes eligible for erasure.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,
    /// Maximum permanent deletions admitted per UTC day.
    #[serde(default = "default_max_deletions_per_day")]
    pub max_deletions_per_day: u32,
    /// How many days ahead the scheduler probes for spare capacity before deferring.
    #[serde(default = "default_max_probe_days")]
    pub max_probe_days: u32,
    /// Seconds between scheduler ticks (default: 1 hour).
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
    /// Seconds between executor ticks (default: 1 day).
    #[serde(default = "default_executor_interval_secs")]
    pub executor_interval_secs: u64,
    /// Seconds between housekeeping sweeps of expired tokens and counters.
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
    /// Records processed per scheduler or executor tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_grace_period_days() -> u32 {
    crate::DEFAULT_GRACE_PERIOD_DAYS
}

fn default_max_deletions_per_day() -> u32 {
    crate::DEFAULT_MAX_DELETIONS_PER_DAY
}

fn default_max_probe_days() -> u32 {
    3650
}

fn default_scheduler_interval_secs() -> u64 {
    3600
}

fn default_executor_interval_secs() -> u64 {
    86400
}

fn default_housekeeping_interval_secs() -> u64 {
    3600
}

fn default_batch_size() -> u32 {
    500
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            max_deletions_per_day: default_max_deletions_per_day(),
            max_probe_days: default_max_probe_days(),
            scheduler_interval_secs: default_scheduler_interval_secs(),
            executor_interval_secs: default_executor_interval_secs(),
            housekeeping_interval_secs: default_housekeeping_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl DeletionConfig {
    /// Grace period as a Duration.
    pub fn grace_period(&self) -> Duration {
        Duration::days(i64::from(self.grace_period_days))
    }

    /// Scheduler tick interval.
    pub fn scheduler_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler_interval_secs)
    }

    /// Executor tick interval.
    pub fn executor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.executor_interval_secs)
    }

    /// Housekeeping sweep interval.
    pub fn housekeeping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.housekeeping_interval_secs)
    }

    /// Validate deletion configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_deletions_per_day == 0 {
            return Err("deletion.max_deletions_per_day must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return Err("deletion.batch_size must be at least 1".to_string());
        }
        // tokio::time::interval panics on a zero period.
        for (name, value) in [
            ("scheduler_interval_secs", self.scheduler_interval_secs),
            ("executor_interval_secs", self.executor_interval_secs),
            ("housekeeping_interval_secs", self.housekeeping_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("deletion.{name} cannot be 0"));
            }
        }
        Ok(())
    }
}

/// One-time token configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Lifetime of a recovery token in seconds. Independent of the grace period.
    #[serde(default = "default_recovery_token_ttl_secs")]
    pub recovery_token_ttl_secs: u64,
}

fn default_recovery_token_ttl_secs() -> u64 {
    86400 // 24 hours
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            recovery_token_ttl_secs: default_recovery_token_ttl_secs(),
        }
    }
}

impl TokenConfig {
    /// Recovery token lifetime as a Duration.
    pub fn recovery_token_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.recovery_token_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Validate token configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.recovery_token_ttl_secs == 0 {
            return Err("tokens.recovery_token_ttl_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Where rate-limit counters live.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Counters in the metadata store, shared by every process.
    #[default]
    Metadata,
    /// Counters in process memory. Single node only.
    Memory,
}

/// Notification rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting (default: true).
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Counter storage backend.
    #[serde(default)]
    pub backend: RateLimitBackend,
    /// Emails a single recipient may receive per UTC day.
    #[serde(default = "default_max_emails_per_recipient_per_day")]
    pub max_emails_per_recipient_per_day: u32,
    /// Permanent-deletion notices the whole system may send per UTC day.
    #[serde(default = "default_max_deletion_notices_per_day")]
    pub max_deletion_notices_per_day: u32,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_max_emails_per_recipient_per_day() -> u32 {
    2
}

fn default_max_deletion_notices_per_day() -> u32 {
    1000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            backend: RateLimitBackend::default(),
            max_emails_per_recipient_per_day: default_max_emails_per_recipient_per_day(),
            max_deletion_notices_per_day: default_max_deletion_notices_per_day(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration.
    /// Returns warnings for settings that are allowed but suspicious.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            warnings.push(
                "rate_limit.enabled=false: notification emails are not capped per recipient"
                    .to_string(),
            );
            return Ok(warnings);
        }

        if self.max_emails_per_recipient_per_day == 0 {
            warnings.push(
                "rate_limit.max_emails_per_recipient_per_day=0 suppresses every notification"
                    .to_string(),
            );
        }

        if self.backend == RateLimitBackend::Memory {
            warnings.push(
                "rate_limit.backend=memory: limits are per process and reset on restart"
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

/// Event bus configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Publish attempts before the failure is surfaced (default: 3).
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    /// Fixed delay between publish attempts in milliseconds (default: 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub publish_retry_delay_ms: u64,
    /// Handler invocations per delivered message before it is dropped.
    #[serde(default = "default_delivery_max_attempts")]
    pub delivery_max_attempts: u32,
    /// Fixed delay between redeliveries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub delivery_retry_delay_ms: u64,
    /// Buffered messages per subscription.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_publish_max_attempts() -> u32 {
    3
}

fn default_delivery_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            publish_max_attempts: default_publish_max_attempts(),
            publish_retry_delay_ms: default_retry_delay_ms(),
            delivery_max_attempts: default_delivery_max_attempts(),
            delivery_retry_delay_ms: default_retry_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EventsConfig {
    /// Retry policy for publishing.
    pub fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_max_attempts,
            std::time::Duration::from_millis(self.publish_retry_delay_ms),
        )
    }

    /// Retry policy for handler redelivery.
    pub fn delivery_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery_max_attempts,
            std::time::Duration::from_millis(self.delivery_retry_delay_ms),
        )
    }

    /// Validate event bus configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.publish_max_attempts == 0 {
            return Err("events.publish_max_attempts must be at least 1".to_string());
        }
        if self.delivery_max_attempts == 0 {
            return Err("events.delivery_max_attempts must be at least 1".to_string());
        }
        // tokio::sync::mpsc::channel panics on zero capacity.
        if self.channel_capacity == 0 {
            return Err("events.channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Outbound notification configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Public base URL of the application, used to build links in emails.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Path of the account recovery page.
    #[serde(default = "default_recovery_path")]
    pub recovery_path: String,
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_recovery_path() -> String {
    "/recover-account".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            recovery_path: default_recovery_path(),
        }
    }
}

impl NotificationConfig {
    /// Build the recovery link for a token.
    pub fn recovery_link(&self, token: &str) -> String {
        format!(
            "{}{}?token={}",
            self.app_url.trim_end_matches('/'),
            self.recovery_path,
            token
        )
    }

    /// Validate notification configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.app_url.starts_with("http://") || self.app_url.starts_with("https://")) {
            return Err(format!(
                "notifications.app_url must be an http(s) URL, got '{}'",
                self.app_url
            ));
        }
        if !self.recovery_path.starts_with('/') {
            return Err("notifications.recovery_path must start with '/'".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ops endpoint configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Deletion lifecycle configuration.
    #[serde(default)]
    pub deletion: DeletionConfig,
    /// One-time token configuration.
    #[serde(default)]
    pub tokens: TokenConfig,
    /// Notification rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Event bus configuration.
    #[serde(default)]
    pub events: EventsConfig,
    /// Outbound notification configuration.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** In-memory rate limiting and no publish delays.
    pub fn for_testing() -> Self {
        Self {
            rate_limit: RateLimitConfig {
                backend: RateLimitBackend::Memory,
                ..RateLimitConfig::default()
            },
            events: EventsConfig {
                publish_retry_delay_ms: 0,
                delivery_retry_delay_ms: 0,
                ..EventsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section. Returns warnings on success.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.metadata.validate()?;
        self.deletion.validate()?;
        self.tokens.validate()?;
        self.events.validate()?;
        self.notifications.validate()?;
        self.rate_limit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_lifecycle_policy() {
        let config = AppConfig::default();
        assert_eq!(config.deletion.grace_period_days, 90);
        assert_eq!(config.deletion.max_deletions_per_day, 10);
        assert_eq!(config.rate_limit.max_emails_per_recipient_per_day, 2);
        assert_eq!(config.events.publish_max_attempts, 3);
        assert_eq!(config.deletion.grace_period(), Duration::days(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = AppConfig::for_testing();
        config.deletion.max_deletions_per_day = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("max_deletions_per_day"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = DeletionConfig {
            executor_interval_secs: 0,
            ..DeletionConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("executor_interval_secs"));
    }

    #[test]
    fn test_postgres_requires_location() {
        let config = MetadataConfig::Postgres {
            url: None,
            host: None,
            port: None,
            username: None,
            password: None,
            database: Some("sunset".to_string()),
            ssl_mode: None,
            max_connections: 4,
            statement_timeout_ms: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recovery_link() {
        let config = NotificationConfig {
            app_url: "https://app.example.com/".to_string(),
            ..NotificationConfig::default()
        };
        assert_eq!(
            config.recovery_link("abc"),
            "https://app.example.com/recover-account?token=abc"
        );
    }

    #[test]
    fn test_memory_backend_warns() {
        let config = AppConfig::for_testing();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("backend=memory")));
    }

    #[test]
    fn test_deserialize_partial_toml_shape() {
        let json = serde_json::json!({
            "deletion": { "max_deletions_per_day": 25 },
            "metadata": { "type": "sqlite", "path": "/tmp/sunset.db" }
        });
        let config: AppConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.deletion.max_deletions_per_day, 25);
        assert_eq!(config.deletion.grace_period_days, 90);
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
    }
}
