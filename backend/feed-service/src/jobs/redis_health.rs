//! Redis connection health check
//!
//! Pings the shared cache connection on an interval so a dropped connection
//! is noticed (and re-established by the connection manager) between feed
//! requests rather than during them.

use feed_cache::CacheBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Clone)]
pub struct RedisHealthConfig {
    pub enabled: bool,
    pub check_interval: Duration,
}

impl Default for RedisHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: HEALTH_CHECK_INTERVAL,
        }
    }
}

/// Run until `shutdown` flips to `true`.
pub async fn start_redis_health_check(
    cache: Arc<dyn CacheBackend>,
    config: RedisHealthConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if !config.enabled {
        tracing::info!("Redis health check disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.check_interval.as_secs(),
        "Starting Redis health check"
    );

    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = sleep(config.check_interval) => {}
            _ = shutdown.changed() => {
                tracing::info!("Redis health check stopped");
                return;
            }
        }

        match cache.ping().await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    tracing::info!(
                        previous_failures = consecutive_failures,
                        "Redis connection recovered"
                    );
                }
                consecutive_failures = 0;
                tracing::debug!("Redis health check: OK");
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        consecutive_failures,
                        error = %e,
                        "Redis health check: repeated failures"
                    );
                } else {
                    tracing::warn!(consecutive_failures, error = %e, "Redis health check failed");
                }
            }
        }
    }
}
