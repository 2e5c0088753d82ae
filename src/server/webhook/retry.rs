//! Campaign retry decision for calls that were busy or not answered

use chrono::{DateTime, Duration, Utc};

use crate::models::Campaign;

/// Longest wait between two attempts: 30 days.
pub const MAX_RETRY_DELAY_MINUTES: i64 = 30 * 24 * 60;

/// Whether a configured retry delay is accepted for a campaign.
pub fn is_valid_delay(minutes: i64) -> bool {
    (1..=MAX_RETRY_DELAY_MINUTES).contains(&minutes)
}

/// Retry settings of a campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub interval_minutes: i64,
    /// Delay before retry `n + 1` is entry `n`; the last entry repeats.
    pub custom_schedule: Option<Vec<i64>>,
}

impl RetryPolicy {
    pub fn from_campaign(campaign: &Campaign) -> Self {
        Self {
            max_retries: campaign.max_retries.max(0),
            interval_minutes: campaign.retry_interval_minutes as i64,
            custom_schedule: campaign
                .custom_retry_schedule
                .as_ref()
                .map(|schedule| schedule.0.clone())
                .filter(|schedule| !schedule.is_empty()),
        }
    }

    /// Wait before the retry that follows attempt `retry_count`, clamped to
    /// between a minute and [`MAX_RETRY_DELAY_MINUTES`].
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let minutes = match &self.custom_schedule {
            Some(schedule) => {
                let index = (retry_count.max(0) as usize).min(schedule.len() - 1);
                schedule[index]
            }
            None => self.interval_minutes,
        };
        Duration::minutes(minutes.clamp(1, MAX_RETRY_DELAY_MINUTES))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Queue a successor attempt.
    Retry {
        retry_count: i32,
        scheduled_for: DateTime<Utc>,
    },
    /// No attempts left; the queue item fails.
    Exhausted,
}

pub fn decide(policy: &RetryPolicy, retry_count: i32, now: DateTime<Utc>) -> RetryDecision {
    if retry_count >= policy.max_retries {
        return RetryDecision::Exhausted;
    }
    match now.checked_add_signed(policy.delay_for(retry_count)) {
        Some(scheduled_for) => RetryDecision::Retry {
            retry_count: retry_count + 1,
            scheduled_for,
        },
        None => RetryDecision::Exhausted,
    }
}

/// What applying a decision did to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Requeued { queue_item_id: i64, retry_count: i32, scheduled_for: DateTime<Utc> },
    Failed,
    /// The queue item was already finished by an earlier webhook.
    AlreadySettled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: i32, interval: i64, schedule: Option<Vec<i64>>) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            interval_minutes: interval,
            custom_schedule: schedule,
        }
    }

    #[test]
    fn test_retry_below_max() {
        let now = Utc::now();
        match decide(&policy(3, 30, None), 1, now) {
            RetryDecision::Retry { retry_count, scheduled_for } => {
                assert_eq!(retry_count, 2);
                assert_eq!(scheduled_for, now + Duration::minutes(30));
                assert!(scheduled_for > now);
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_at_max() {
        assert_eq!(decide(&policy(2, 30, None), 2, Utc::now()), RetryDecision::Exhausted);
        assert_eq!(decide(&policy(0, 30, None), 0, Utc::now()), RetryDecision::Exhausted);
    }

    #[test]
    fn test_custom_schedule_per_attempt() {
        let p = policy(5, 30, Some(vec![5, 60, 240]));
        assert_eq!(p.delay_for(0), Duration::minutes(5));
        assert_eq!(p.delay_for(1), Duration::minutes(60));
        assert_eq!(p.delay_for(2), Duration::minutes(240));
        assert_eq!(p.delay_for(4), Duration::minutes(240));
    }

    #[test]
    fn test_delay_never_zero() {
        let now = Utc::now();
        let p = policy(1, 0, None);
        match decide(&p, 0, now) {
            RetryDecision::Retry { scheduled_for, .. } => assert!(scheduled_for > now),
            other => panic!("expected retry, got {:?}", other),
        }
        assert_eq!(policy(1, 30, Some(vec![-10])).delay_for(0), Duration::minutes(1));
    }

    #[test]
    fn test_oversized_delay_is_clamped() {
        let now = Utc::now();
        let max = Duration::minutes(MAX_RETRY_DELAY_MINUTES);

        let p = policy(3, 30, Some(vec![1_000_000_000_000_000]));
        assert_eq!(p.delay_for(0), max);
        match decide(&p, 0, now) {
            RetryDecision::Retry { scheduled_for, .. } => assert_eq!(scheduled_for, now + max),
            other => panic!("expected retry, got {:?}", other),
        }
        assert_eq!(policy(3, i64::MAX, None).delay_for(0), max);
        assert_eq!(policy(3, i64::MIN, None).delay_for(0), Duration::minutes(1));
    }

    #[test]
    fn test_unschedulable_retry_is_exhausted() {
        assert_eq!(decide(&policy(3, 30, None), 0, DateTime::<Utc>::MAX_UTC), RetryDecision::Exhausted);
    }

    #[test]
    fn test_valid_delay_bounds() {
        assert!(is_valid_delay(1));
        assert!(is_valid_delay(MAX_RETRY_DELAY_MINUTES));
        assert!(!is_valid_delay(0));
        assert!(!is_valid_delay(MAX_RETRY_DELAY_MINUTES + 1));
    }
}
