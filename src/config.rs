//! Runtime configuration, loaded from the environment.
//!
//! Mirrors the teacher's `dotenv::dotenv()` + env-var convention in `main.rs`
//! and `database::Database::new`'s `DATABASE_MAX_CONNECTIONS` lookup, but
//! centralizes every knob into one struct instead of scattering `env::var`
//! calls across modules.

use std::time::Duration;

use crate::error::{Error, Result};

/// All tunables for the sync/classification/analyzer pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub encryption_key_b64: Option<String>,

    /// How long a calendar's cached window may go unrefreshed before a
    /// request triggers a synchronous incremental sync (default 24h).
    pub staleness_threshold: Duration,
    /// Default initial water-mark target, expressed as weeks before/after
    /// today: (-4, +1) means four weeks back through one week forward.
    pub default_sync_window_weeks: (i64, i64),

    /// Minimum confidence to auto-classify an event.
    pub scoring_floor: f64,
    /// Confidence at or above which `needs_review` is cleared.
    pub scoring_ceiling: f64,

    /// Rounding granularity in minutes for computed hours.
    pub rounding_granularity_minutes: i64,
    /// Remainder at or above which rounding goes up instead of down.
    pub rounding_pivot_minutes: i64,

    pub job_worker_count: usize,
    pub job_poll_interval: Duration,
    pub job_retention: Duration,
    pub scheduler_cadence: Duration,

    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Consecutive sync failures before a calendar is demoted from the
    /// background scheduler.
    pub failure_threshold: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::invalid_argument("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            database_max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 10),
            encryption_key_b64: std::env::var("TIMECORE_ENCRYPTION_KEY").ok(),
            staleness_threshold: Duration::from_secs(env_u64("STALENESS_THRESHOLD_SECS", 24 * 3600)),
            default_sync_window_weeks: (
                -(env_u32("SYNC_WINDOW_WEEKS_BACK", 4) as i64),
                env_u32("SYNC_WINDOW_WEEKS_FORWARD", 1) as i64,
            ),
            scoring_floor: env_f64("SCORING_FLOOR", 0.5),
            scoring_ceiling: env_f64("SCORING_CEILING", 0.8),
            rounding_granularity_minutes: env_u32("ROUNDING_GRANULARITY_MINUTES", 15) as i64,
            rounding_pivot_minutes: env_u32("ROUNDING_PIVOT_MINUTES", 7) as i64,
            job_worker_count: env_u32("JOB_WORKER_COUNT", 2) as usize,
            job_poll_interval: Duration::from_millis(env_u64("JOB_POLL_INTERVAL_MS", 2000)),
            job_retention: Duration::from_secs(env_u64("JOB_RETENTION_SECS", 7 * 24 * 3600)),
            scheduler_cadence: Duration::from_secs(env_u64("SCHEDULER_CADENCE_SECS", 24 * 3600)),
            max_retries: env_u32("CALENDAR_MAX_RETRIES", 3),
            initial_backoff: Duration::from_millis(env_u64("CALENDAR_INITIAL_BACKOFF_MS", 1000)),
            max_backoff: Duration::from_millis(env_u64("CALENDAR_MAX_BACKOFF_MS", 30_000)),
            failure_threshold: env_u32("SYNC_FAILURE_THRESHOLD", 3),
        })
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        std::env::remove_var("SCORING_FLOOR");
        assert_eq!(env_f64("SCORING_FLOOR", 0.5), 0.5);
    }
}
