use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{types::timestamp::latest_storable, JobRecord, JobState};

/// Interval used when a policy resolves to no interval at all
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Retry budget of the registry's default policy
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Constant term of the exponential backoff, in seconds
pub const EXPONENTIAL_BASE_SECS: u64 = 30;

/// Delay between a failed attempt and the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryInterval {
    Fixed(Duration),
    /// `30 + retry_count^5` seconds
    Exponential,
}

impl RetryInterval {
    pub fn resolve(self, retry_count: u32) -> Duration {
        match self {
            Self::Fixed(interval) => interval,
            Self::Exponential => Duration::from_secs(
                u64::from(retry_count)
                    .saturating_pow(5)
                    .saturating_add(EXPONENTIAL_BASE_SECS),
            ),
        }
    }
}

/// Custom backoff: receives the zero-based retry count, `None` dead-letters the job
pub type RetryBlock = Arc<dyn Fn(u32) -> Option<RetryInterval> + Send + Sync>;

/// What the retry engine did with a failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_execution_at: DateTime<Utc> },
    Dead,
}

/// Per job type retry configuration
#[derive(Clone)]
pub struct RetryPolicy {
    pub interval: Option<RetryInterval>,
    pub max_retries: Option<u32>,
    /// Lane retries are rerouted to
    pub queue: Option<String>,
    pub block: Option<RetryBlock>,
}

impl RetryPolicy {
    /// Policy with nothing set: retries forever at [`DEFAULT_RETRY_INTERVAL`]
    pub fn new() -> Self {
        Self {
            interval: None,
            max_retries: None,
            queue: None,
            block: None,
        }
    }

    /// Fixed interval policy
    pub fn fixed(interval: Duration) -> Self {
        Self::new().with_interval(RetryInterval::Fixed(interval))
    }

    /// Exponential backoff policy
    pub fn exponential() -> Self {
        Self::new().with_interval(RetryInterval::Exponential)
    }

    pub fn with_interval(mut self, interval: RetryInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_block<F>(mut self, block: F) -> Self
    where
        F: Fn(u32) -> Option<RetryInterval> + Send + Sync + 'static,
    {
        self.block = Some(Arc::new(block));
        self
    }

    /// Decide what happens to a job whose attempt just failed
    ///
    /// Expects `attempts` to already count the failed attempt. Either marks the
    /// job dead or schedules `next_execution_at` relative to `last_executed_at`
    /// (falling back to `now`) and applies the queue override.
    pub fn apply(&self, job: &mut JobRecord, now: DateTime<Utc>) -> RetryDecision {
        let retry_count = job.retry_count();

        if let Some(max_retries) = self.max_retries {
            if retry_count + 1 >= max_retries {
                job.state = JobState::Dead;
                return RetryDecision::Dead;
            }
        }

        let mut interval = self.interval;
        if let Some(block) = &self.block {
            match block(retry_count) {
                Some(custom) => interval = Some(custom),
                None => {
                    job.state = JobState::Dead;
                    return RetryDecision::Dead;
                }
            }
        }

        let delay = interval
            .map(|i| i.resolve(retry_count))
            .unwrap_or(DEFAULT_RETRY_INTERVAL);
        let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        let anchor = job.last_executed_at.unwrap_or(now);
        let next_execution_at = anchor
            .checked_add_signed(delay)
            .map_or(latest_storable(), |at| at.min(latest_storable()));

        job.next_execution_at = Some(next_execution_at);
        job.state = JobState::Failed;

        if let Some(queue) = self.queue.as_deref().filter(|q| !q.is_empty()) {
            job.queue = queue.to_string();
        }

        RetryDecision::Retry { next_execution_at }
    }

    /// Registry default: three attempts, one minute apart
    pub fn registry_default() -> Self {
        Self::fixed(DEFAULT_RETRY_INTERVAL).with_max_retries(DEFAULT_MAX_RETRIES)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("interval", &self.interval)
            .field("max_retries", &self.max_retries)
            .field("queue", &self.queue)
            .field("block", &self.block.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn failed_job(attempts: u32, last_executed_at: Option<DateTime<Utc>>) -> JobRecord {
        let mut job = JobRecord::new("LogQueueable", json!({}));
        job.attempts = attempts;
        job.state = JobState::Failed;
        job.last_executed_at = last_executed_at;
        job.error_details = Some("boom".to_string());
        job
    }

    #[test]
    fn test_fixed_interval_anchored_to_last_execution() {
        let last = Utc::now() - TimeDelta::seconds(100);
        let mut job = failed_job(1, Some(last));
        let decision = RetryPolicy::fixed(Duration::from_secs(10)).apply(&mut job, Utc::now());

        assert_eq!(decision, RetryDecision::Retry { next_execution_at: last + TimeDelta::seconds(10) });
        assert_eq!(job.next_execution_at, Some(last + TimeDelta::seconds(10)));
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_falls_back_to_now_without_last_execution() {
        let now = Utc::now();
        let mut job = failed_job(1, None);
        RetryPolicy::fixed(Duration::from_secs(10)).apply(&mut job, now);
        assert_eq!(job.next_execution_at, Some(now + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_max_retries_dead_letters_without_touching_fields() {
        let now = Utc::now();
        let policy = RetryPolicy::fixed(Duration::from_secs(10))
            .with_max_retries(3)
            .with_queue("slow");

        let mut second = failed_job(2, Some(now));
        assert!(matches!(policy.apply(&mut second, now), RetryDecision::Retry { .. }));

        let mut third = failed_job(3, Some(now));
        assert_eq!(policy.apply(&mut third, now), RetryDecision::Dead);
        assert_eq!(third.state, JobState::Dead);
        assert_eq!(third.queue, "default");
        assert!(third.next_execution_at.is_none());
    }

    #[test]
    fn test_block_opt_out_dead_letters() {
        let now = Utc::now();
        let policy = RetryPolicy::fixed(Duration::from_secs(10))
            .with_block(|retry_count| (retry_count < 1).then_some(RetryInterval::Fixed(Duration::from_secs(2))));

        let mut first = failed_job(1, Some(now));
        assert_eq!(
            policy.apply(&mut first, now),
            RetryDecision::Retry { next_execution_at: now + TimeDelta::seconds(2) }
        );

        let mut second = failed_job(2, Some(now));
        assert_eq!(policy.apply(&mut second, now), RetryDecision::Dead);
        assert_eq!(second.state, JobState::Dead);
    }

    #[test]
    fn test_block_may_request_exponential() {
        let now = Utc::now();
        let policy = RetryPolicy::new().with_block(|_| Some(RetryInterval::Exponential));
        let mut job = failed_job(3, Some(now));
        policy.apply(&mut job, now);
        assert_eq!(job.next_execution_at, Some(now + TimeDelta::seconds(30 + 32)));
    }

    #[test]
    fn test_exponential_formula() {
        assert_eq!(RetryInterval::Exponential.resolve(0), Duration::from_secs(30));
        assert_eq!(RetryInterval::Exponential.resolve(1), Duration::from_secs(31));
        assert_eq!(RetryInterval::Exponential.resolve(2), Duration::from_secs(62));
        assert_eq!(RetryInterval::Exponential.resolve(4), Duration::from_secs(30 + 1024));
    }

    #[test]
    fn test_queue_override() {
        let now = Utc::now();
        let mut job = failed_job(1, Some(now));
        RetryPolicy::fixed(Duration::from_secs(1)).with_queue("slow_retries").apply(&mut job, now);
        assert_eq!(job.queue, "slow_retries");

        let mut job = failed_job(1, Some(now));
        RetryPolicy::fixed(Duration::from_secs(1)).with_queue("").apply(&mut job, now);
        assert_eq!(job.queue, "default");
    }

    #[test]
    fn test_unset_interval_uses_default() {
        let now = Utc::now();
        let mut job = failed_job(1, Some(now));
        RetryPolicy::new().apply(&mut job, now);
        assert_eq!(job.next_execution_at, Some(now + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_huge_backoff_is_clamped_to_four_digit_years() {
        let now = Utc::now();
        let mut job = failed_job(400, Some(now));
        let decision = RetryPolicy::exponential().apply(&mut job, now);

        assert_eq!(decision, RetryDecision::Retry { next_execution_at: latest_storable() });
        assert_eq!(job.next_execution_at, Some(latest_storable()));
        assert!(job.ensure_storable().is_ok());
    }

    #[test]
    fn test_registry_default_dead_letters_on_third_failure() {
        let now = Utc::now();
        let policy = RetryPolicy::registry_default();
        let mut job = failed_job(3, Some(now));
        assert_eq!(policy.apply(&mut job, now), RetryDecision::Dead);
    }

    proptest! {
        #[test]
        fn prop_exponential_is_monotonic(retry_count in 0u32..10_000) {
            let current = RetryInterval::Exponential.resolve(retry_count);
            let next = RetryInterval::Exponential.resolve(retry_count + 1);
            prop_assert!(next >= current);
            prop_assert!(current >= Duration::from_secs(EXPONENTIAL_BASE_SECS));
        }

        #[test]
        fn prop_retry_schedule_is_always_storable(attempts in 1u32..u32::MAX) {
            let now = Utc::now();
            let mut job = failed_job(attempts, Some(now));
            RetryPolicy::exponential().apply(&mut job, now);
            prop_assert!(job.ensure_storable().is_ok());
        }

        #[test]
        fn prop_fixed_interval_is_last_execution_plus_interval(attempts in 1u32..50, secs in 0u64..86_400) {
            let last = Utc::now();
            let mut job = failed_job(attempts, Some(last));
            RetryPolicy::fixed(Duration::from_secs(secs)).apply(&mut job, last + TimeDelta::hours(1));
            prop_assert_eq!(job.next_execution_at, Some(last + TimeDelta::seconds(secs as i64)));
            prop_assert_eq!(job.attempts, attempts);
        }

        #[test]
        fn prop_dead_exactly_when_budget_spent(attempts in 1u32..20, max_retries in 1u32..20) {
            let now = Utc::now();
            let mut job = failed_job(attempts, Some(now));
            let decision = RetryPolicy::fixed(Duration::from_secs(1)).with_max_retries(max_retries).apply(&mut job, now);
            prop_assert_eq!(decision == RetryDecision::Dead, attempts >= max_retries);
        }
    }
}
