/// Configuration management for feed-service
///
/// Loads configuration from environment variables, optionally seeded from a
/// `.env` file.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub feed: FeedConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Apply `migrations/` at start-up
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Read path tunables shared by the newsfeed and timeline caches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    /// Maximum number of entries kept in one cached list
    pub list_limit: usize,
    /// Entries per `before` / first page
    pub page_size: usize,
    pub cache_ttl_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            list_limit: 1000,
            page_size: 20,
            cache_ttl_secs: feed_cache::ttl::FEED_LIST,
        }
    }
}

/// Fanout worker pool tunables
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Followers per batch job
    pub batch_size: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Hard limit for a single job
    pub batch_timeout_secs: u64,
    /// Attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff
    pub retry_backoff_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: 4,
            queue_capacity: 10_000,
            batch_timeout_secs: 60 * 60,
            max_attempts: 5,
            retry_backoff_ms: 200,
        }
    }
}

impl FanoutConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_run_migrations() -> bool {
    true
}

/// Parse an optional variable, failing loudly on a malformed value.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("APP_PORT", 8084)?,
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections())?,
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections())?,
            run_migrations: env_or("DB_RUN_MIGRATIONS", default_run_migrations())?,
        };

        let redis = RedisConfig {
            url: std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?,
        };

        let feed_defaults = FeedConfig::default();
        let feed = FeedConfig {
            list_limit: env_or("FEED_LIST_LIMIT", feed_defaults.list_limit)?,
            page_size: env_or("FEED_PAGE_SIZE", feed_defaults.page_size)?,
            cache_ttl_secs: env_or("FEED_CACHE_TTL_SECS", feed_defaults.cache_ttl_secs)?,
        };

        let fanout_defaults = FanoutConfig::default();
        let fanout = FanoutConfig {
            batch_size: env_or("FANOUT_BATCH_SIZE", fanout_defaults.batch_size)?,
            workers: env_or("FANOUT_WORKERS", fanout_defaults.workers)?,
            queue_capacity: env_or("FANOUT_QUEUE_CAPACITY", fanout_defaults.queue_capacity)?,
            batch_timeout_secs: env_or(
                "FANOUT_BATCH_TIMEOUT_SECS",
                fanout_defaults.batch_timeout_secs,
            )?,
            max_attempts: env_or("FANOUT_MAX_ATTEMPTS", fanout_defaults.max_attempts)?,
            retry_backoff_ms: env_or("FANOUT_RETRY_BACKOFF_MS", fanout_defaults.retry_backoff_ms)?,
        };

        let config = Config {
            app,
            database,
            redis,
            feed,
            fanout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.feed.validate()?;
        self.fanout.validate()?;
        if self.database.min_connections > self.database.max_connections {
            bail!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }
        Ok(())
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.list_limit == 0 {
            bail!("FEED_LIST_LIMIT must be positive");
        }
        if self.page_size == 0 {
            bail!("FEED_PAGE_SIZE must be positive");
        }
        if self.page_size > self.list_limit {
            bail!(
                "FEED_PAGE_SIZE ({}) must not exceed FEED_LIST_LIMIT ({})",
                self.page_size,
                self.list_limit
            );
        }
        if self.cache_ttl_secs == 0 {
            bail!("FEED_CACHE_TTL_SECS must be positive");
        }
        Ok(())
    }
}

impl FanoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("FANOUT_BATCH_SIZE must be positive");
        }
        if self.workers == 0 {
            bail!("FANOUT_WORKERS must be positive");
        }
        if self.queue_capacity == 0 {
            bail!("FANOUT_QUEUE_CAPACITY must be positive");
        }
        if self.batch_timeout_secs == 0 {
            bail!("FANOUT_BATCH_TIMEOUT_SECS must be positive");
        }
        if self.max_attempts == 0 {
            bail!("FANOUT_MAX_ATTEMPTS must be positive");
        }
        Ok(())
    }
}
