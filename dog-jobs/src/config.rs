use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Default sleep between idle polls
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which a reservation counts as abandoned
pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_DATABASE_URL: &str = "sqlite://dog_jobs.db";

/// What a worker does when its store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorPolicy {
    /// Log, wait `backoff`, then poll again
    Retry { backoff: Duration },
    /// Stop the worker and surface the error
    Terminate,
}

impl Default for StoreErrorPolicy {
    fn default() -> Self {
        Self::Retry { backoff: DEFAULT_POLLING_INTERVAL }
    }
}

/// Per-worker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub polling_interval: Duration,
    /// Lanes this worker claims from; empty means all
    pub queues: Vec<String>,
    pub store_error_policy: StoreErrorPolicy,
}

impl WorkerConfig {
    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_store_error_policy(mut self, policy: StoreErrorPolicy) -> Self {
        self.store_error_policy = policy;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            queues: Vec::new(),
            store_error_policy: StoreErrorPolicy::default(),
        }
    }
}

/// Stale reservation reaper settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub reservation_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAPER_INTERVAL,
            reservation_timeout: DEFAULT_RESERVATION_TIMEOUT,
        }
    }
}

/// Process-level settings for a worker deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub database_url: String,
    pub workers: usize,
    pub worker: WorkerConfig,
    /// Reaper runs only when set
    pub reaper: Option<ReaperConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            workers: 1,
            worker: WorkerConfig::default(),
            reaper: None,
        }
    }
}

impl QueueConfig {
    /// Load from `DOG_JOBS_*` environment variables, defaulting whatever is unset
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `DOG_JOBS_DATABASE_URL` | SQLite connection string |
    /// | `DOG_JOBS_WORKERS` | number of workers |
    /// | `DOG_JOBS_POLLING_INTERVAL_SECS` | idle poll sleep |
    /// | `DOG_JOBS_QUEUES` | comma separated lanes, empty for all |
    /// | `DOG_JOBS_STORE_ERROR_POLICY` | `retry` or `terminate` |
    /// | `DOG_JOBS_STORE_RETRY_BACKOFF_SECS` | wait before retrying an unreachable store |
    /// | `DOG_JOBS_REAPER_ENABLED` | `true` to run the stale reservation reaper |
    /// | `DOG_JOBS_REAPER_INTERVAL_SECS` | reaper period |
    /// | `DOG_JOBS_RESERVATION_TIMEOUT_SECS` | age of an abandoned reservation |
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse = |key: &str| -> QueueResult<Option<u64>> { parse_var::<u64>(&lookup, key) };
        let secs = |key: &str, default: Duration| -> QueueResult<Duration> {
            Ok(parse(key)?.map(Duration::from_secs).unwrap_or(default))
        };
        let period = |key: &str, default: Duration| -> QueueResult<Duration> {
            let value = secs(key, default)?;
            if value.is_zero() {
                return Err(QueueError::Config(format!("{} must be at least 1", key)));
            }
            Ok(value)
        };

        let database_url = lookup("DOG_JOBS_DATABASE_URL").unwrap_or(defaults.database_url);

        let workers = parse_var::<usize>(&lookup, "DOG_JOBS_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(QueueError::Config("DOG_JOBS_WORKERS must be at least 1".to_string()));
        }

        let queues = lookup("DOG_JOBS_QUEUES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let backoff = period("DOG_JOBS_STORE_RETRY_BACKOFF_SECS", DEFAULT_POLLING_INTERVAL)?;
        let store_error_policy = match lookup("DOG_JOBS_STORE_ERROR_POLICY").as_deref().map(str::trim) {
            None | Some("") | Some("retry") => StoreErrorPolicy::Retry { backoff },
            Some("terminate") => StoreErrorPolicy::Terminate,
            Some(other) => {
                return Err(QueueError::Config(format!(
                    "DOG_JOBS_STORE_ERROR_POLICY must be 'retry' or 'terminate', got '{}'",
                    other
                )))
            }
        };

        let worker = WorkerConfig {
            polling_interval: period("DOG_JOBS_POLLING_INTERVAL_SECS", DEFAULT_POLLING_INTERVAL)?,
            queues,
            store_error_policy,
        };

        let reaper_enabled = parse_var::<bool>(&lookup, "DOG_JOBS_REAPER_ENABLED")?.unwrap_or(false);
        let reaper = if reaper_enabled {
            Some(ReaperConfig {
                interval: period("DOG_JOBS_REAPER_INTERVAL_SECS", DEFAULT_REAPER_INTERVAL)?,
                reservation_timeout: secs("DOG_JOBS_RESERVATION_TIMEOUT_SECS", DEFAULT_RESERVATION_TIMEOUT)?,
            })
        } else {
            None
        };

        Ok(Self {
            database_url,
            workers,
            worker,
            reaper,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| QueueError::Config(format!("{}: {}", key, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> QueueResult<QueueConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        QueueConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.worker.polling_interval, Duration::from_secs(5));
        assert!(config.worker.queues.is_empty());
        assert!(config.reaper.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DOG_JOBS_DATABASE_URL", "sqlite://jobs.db"),
            ("DOG_JOBS_WORKERS", "4"),
            ("DOG_JOBS_POLLING_INTERVAL_SECS", "1"),
            ("DOG_JOBS_QUEUES", "default, mail ,"),
            ("DOG_JOBS_STORE_ERROR_POLICY", "terminate"),
            ("DOG_JOBS_REAPER_ENABLED", "true"),
            ("DOG_JOBS_RESERVATION_TIMEOUT_SECS", "60"),
        ])
        .unwrap();

        assert_eq!(config.database_url, "sqlite://jobs.db");
        assert_eq!(config.workers, 4);
        assert_eq!(config.worker.polling_interval, Duration::from_secs(1));
        assert_eq!(config.worker.queues, vec!["default", "mail"]);
        assert_eq!(config.worker.store_error_policy, StoreErrorPolicy::Terminate);

        let reaper = config.reaper.unwrap();
        assert_eq!(reaper.reservation_timeout, Duration::from_secs(60));
        assert_eq!(reaper.interval, DEFAULT_REAPER_INTERVAL);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(load(&[("DOG_JOBS_WORKERS", "many")]), Err(QueueError::Config(_))));
        assert!(matches!(load(&[("DOG_JOBS_WORKERS", "0")]), Err(QueueError::Config(_))));
        assert!(matches!(load(&[("DOG_JOBS_STORE_ERROR_POLICY", "panic")]), Err(QueueError::Config(_))));
        assert!(matches!(load(&[("DOG_JOBS_REAPER_ENABLED", "sure")]), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_zero_periods_are_rejected() {
        for key in [
            "DOG_JOBS_POLLING_INTERVAL_SECS",
            "DOG_JOBS_STORE_RETRY_BACKOFF_SECS",
            "DOG_JOBS_REAPER_INTERVAL_SECS",
        ] {
            let result = load(&[("DOG_JOBS_REAPER_ENABLED", "true"), (key, "0")]);
            assert!(matches!(result, Err(QueueError::Config(ref msg)) if msg.contains(key)), "{}", key);
        }

        let config = load(&[("DOG_JOBS_RESERVATION_TIMEOUT_SECS", "0"), ("DOG_JOBS_REAPER_ENABLED", "true")]).unwrap();
        assert_eq!(config.reaper.unwrap().reservation_timeout, Duration::ZERO);
    }
}
