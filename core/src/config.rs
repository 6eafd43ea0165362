//! Configuration constants and environment loading.
//!
//! This module manages all runtime configuration:
//! - Streaming limits (subscriptions, per-second frame budget, cache TTL)
//! - Heartbeat and reconnection behavior
//! - Refresh intervals for tracked games
//! - Movement and alert thresholds

use std::env;
use std::time::Duration;
use tracing::warn;

/// Default maximum active subscriptions across channels.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 50;

/// Default maximum concurrently tracked games.
pub const DEFAULT_MAX_TRACKED_GAMES: usize = 20;

/// Default inbound frame budget per rolling one-second window.
pub const DEFAULT_MAX_UPDATES_PER_SECOND: u32 = 10;

/// Default TTL for live-data cache entries in milliseconds.
pub const DEFAULT_LIVE_CACHE_TTL_MS: u64 = 8_000;

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default refresh interval once a game is within the real-time window.
pub const DEFAULT_REAL_TIME_INTERVAL_SECS: u64 = 3;

/// Default refresh interval for tracked games outside the real-time window.
pub const DEFAULT_ACTIVE_GAMES_INTERVAL_SECS: u64 = 30;

/// Default real-time window before game start, in hours.
pub const DEFAULT_REAL_TIME_WINDOW_HOURS: i64 = 2;

/// Default absolute movement magnitude that marks a movement significant.
pub const DEFAULT_SIGNIFICANT_MOVEMENT_THRESHOLD: f64 = 10.0;

/// Default absolute movement magnitude that raises an alert.
pub const DEFAULT_ALERT_MOVEMENT_THRESHOLD: f64 = 20.0;

/// Default magnitude bound above which a movement alert is critical.
pub const DEFAULT_CRITICAL_MOVEMENT_THRESHOLD: f64 = 50.0;

/// Default archive retention for stopped games, in days.
pub const DEFAULT_HISTORICAL_TRACKING_DAYS: u64 = 30;

/// Configuration for reconnection behavior
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Base delay in milliseconds; attempt n waits `base × (n + 1)`.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum reconnection attempts before the connection is closed for good.
    pub max_attempts: u32,
    /// Jitter percentage to prevent thundering herd (0.1 = ±10%).
    pub jitter_pct: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReconnectConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            base_delay_ms: env::var("RECONNECT_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            max_delay_ms: env::var("RECONNECT_MAX_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            max_attempts: env::var("MAX_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            jitter_pct: env::var("RECONNECT_JITTER_PCT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.1),
        }
    }

    /// Backoff delay before retry number `attempt` (zero-based), with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled_ms = self.base_delay_ms.saturating_mul(attempt as u64 + 1);
        let capped_ms = scaled_ms.min(self.max_delay_ms) as f64;

        let jitter_range = capped_ms * self.jitter_pct;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped_ms + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }
}

/// Configuration for streaming connections and dispatch
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub heartbeat_interval: Duration,
    pub max_updates_per_second: u32,
    pub live_cache_ttl: Duration,
    pub max_subscriptions: usize,
    pub reconnect: ReconnectConfig,
}

impl StreamConfig {
    pub fn from_env() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(
                env::var("HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            ),
            max_updates_per_second: env::var("MAX_UPDATES_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPDATES_PER_SECOND),
            live_cache_ttl: Duration::from_millis(
                env::var("LIVE_CACHE_TTL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_LIVE_CACHE_TTL_MS),
            ),
            max_subscriptions: env::var("MAX_SUBSCRIPTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_SUBSCRIPTIONS),
            reconnect: ReconnectConfig::from_env(),
        }
    }
}

/// Configuration for per-game odds tracking
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub real_time_interval: Duration,
    pub active_games_interval: Duration,
    pub real_time_window_hours: i64,
    pub max_tracked_games: usize,
    pub max_movement_history: usize,
    pub significant_movement_threshold: f64,
    pub historical_tracking_days: u64,
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        Self {
            real_time_interval: Duration::from_secs(
                env::var("REAL_TIME_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_REAL_TIME_INTERVAL_SECS),
            ),
            active_games_interval: Duration::from_secs(
                env::var("ACTIVE_GAMES_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_ACTIVE_GAMES_INTERVAL_SECS),
            ),
            real_time_window_hours: env::var("REAL_TIME_WINDOW_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_REAL_TIME_WINDOW_HOURS),
            max_tracked_games: env::var("MAX_TRACKED_GAMES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_TRACKED_GAMES),
            max_movement_history: env::var("MAX_MOVEMENT_HISTORY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            significant_movement_threshold: env::var("SIGNIFICANT_MOVEMENT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SIGNIFICANT_MOVEMENT_THRESHOLD),
            historical_tracking_days: env::var("HISTORICAL_TRACKING_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HISTORICAL_TRACKING_DAYS),
        }
    }
}

/// Configuration for alert evaluation and retention
#[derive(Clone, Debug)]
pub struct AlertConfig {
    pub movement_threshold: f64,
    pub critical_threshold: f64,
    pub retention: Duration,
    pub max_history: usize,
    pub cleanup_interval: Duration,
}

impl AlertConfig {
    pub fn from_env() -> Self {
        Self {
            movement_threshold: env::var("ALERT_MOVEMENT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ALERT_MOVEMENT_THRESHOLD),
            critical_threshold: env::var("CRITICAL_MOVEMENT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CRITICAL_MOVEMENT_THRESHOLD),
            retention: Duration::from_secs(
                env::var("ALERT_RETENTION_HOURS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(24)
                    * 3600,
            ),
            max_history: env::var("MAX_ALERT_HISTORY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            cleanup_interval: Duration::from_secs(3600),
        }
    }

    /// The alert path only sees movements the tracker surfaces, so an alert
    /// threshold below the significance threshold would never fire. Floor it
    /// at the significance threshold.
    pub fn floor_movement_threshold(&mut self, significant: f64) {
        if self.movement_threshold < significant {
            warn!(
                "alert movement threshold {} below significance threshold {}, raising to match",
                self.movement_threshold, significant
            );
            self.movement_threshold = significant;
        }
    }
}

/// Top-level configuration assembled once at process start.
#[derive(Clone, Debug)]
pub struct LiveDataConfig {
    pub stream: StreamConfig,
    pub tracker: TrackerConfig,
    pub alerts: AlertConfig,
}

impl LiveDataConfig {
    pub fn from_env() -> Self {
        let tracker = TrackerConfig::from_env();
        let mut alerts = AlertConfig::from_env();
        alerts.floor_movement_threshold(tracker.significant_movement_threshold);
        Self {
            stream: StreamConfig::from_env(),
            tracker,
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let config = ReconnectConfig {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter_pct: 0.0, // No jitter for predictable testing
        };

        assert_eq!(config.delay_for(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for(2), Duration::from_millis(3000));
        assert_eq!(config.delay_for(4), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let config = ReconnectConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 25_000,
            max_attempts: 10,
            jitter_pct: 0.0,
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(20_000));
        assert_eq!(config.delay_for(2), Duration::from_millis(25_000));
        assert_eq!(config.delay_for(9), Duration::from_millis(25_000));
    }

    #[test]
    fn test_alert_threshold_floored_at_significance() {
        let mut alerts = AlertConfig {
            movement_threshold: 5.0,
            critical_threshold: 50.0,
            retention: Duration::from_secs(24 * 3600),
            max_history: 100,
            cleanup_interval: Duration::from_secs(3600),
        };

        alerts.floor_movement_threshold(10.0);
        assert_eq!(alerts.movement_threshold, 10.0);

        // An already-coarser threshold is left alone.
        alerts.floor_movement_threshold(8.0);
        assert_eq!(alerts.movement_threshold, 10.0);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = ReconnectConfig {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter_pct: 0.1,
        };

        for _ in 0..50 {
            let delay = config.delay_for(0).as_millis() as i64;
            assert!((900..=1100).contains(&delay), "delay {} out of range", delay);
        }
    }
}
