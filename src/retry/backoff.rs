//! Backoff schedule - pure delay computation plus jitter sampling

use crate::retry::strategy::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Largest fraction of a delay that jitter may add
pub const MAX_JITTER_FRACTION: f64 = 0.10;

/// Delay before retry number `attempt` (1-based), without jitter.
///
/// Policies that auto-update the branch wait a flat `base_delay`; otherwise
/// exponential policies double from `base_delay` up to `max_delay`, and
/// linear policies always wait `base_delay`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if policy.auto_update_branch || !policy.exponential_backoff {
        return policy.base_delay;
    }
    let exponent = attempt.saturating_sub(1).min(31);
    policy
        .base_delay
        .checked_mul(1_u32 << exponent)
        .map_or(policy.max_delay, |delay| delay.min(policy.max_delay))
}

/// Add `fraction` (clamped to `0.0..=0.10`) of `delay` on top of it
pub fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    delay + delay.mul_f64(fraction.clamp(0.0, MAX_JITTER_FRACTION))
}

/// Delay before retry number `attempt`, with random jitter when the policy
/// asks for it
pub fn next_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = backoff_delay(policy, attempt);
    if policy.jitter && !delay.is_zero() {
        let fraction = rand::rng().random_range(0.0..=MAX_JITTER_FRACTION);
        apply_jitter(delay, fraction)
    } else {
        delay
    }
}

/// Total wait of a full retry budget, ignoring jitter and capped by the
/// policy timeout. Used for wait-time estimates.
pub fn total_budget(policy: &RetryPolicy) -> Duration {
    if policy.manual_intervention_required {
        return Duration::ZERO;
    }
    let total: Duration = (1..=policy.max_retries)
        .map(|attempt| backoff_delay(policy, attempt))
        .sum();
    total.min(policy.timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MergeableState;

    fn unstable() -> RetryPolicy {
        RetryPolicy::default_for(MergeableState::Unstable)
    }

    #[test]
    fn test_exponential_sequence_for_unstable() {
        let policy = unstable();
        let delays: Vec<u64> = (1..=10)
            .map(|n| backoff_delay(&policy, n).as_secs())
            .collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 300, 300, 300, 300, 300, 300]);
    }

    #[test]
    fn test_jittered_sequence_is_bounded_and_non_decreasing_before_cap() {
        let policy = unstable();
        // 1ms slack for float rounding in mul_f64
        let slack = Duration::from_millis(1);
        let max_with_jitter = policy.max_delay.mul_f64(1.0 + MAX_JITTER_FRACTION) + slack;
        let mut previous_floor = Duration::ZERO;
        for attempt in 1..=10 {
            let floor = backoff_delay(&policy, attempt);
            let delay = next_delay(&policy, attempt);
            assert!(floor >= previous_floor);
            assert!(delay >= floor);
            assert!(delay <= floor.mul_f64(1.0 + MAX_JITTER_FRACTION) + slack);
            assert!(delay <= max_with_jitter);
            previous_floor = floor;
        }
    }

    #[test]
    fn test_auto_update_policy_uses_flat_delay() {
        let policy = RetryPolicy::default_for(MergeableState::Behind);
        assert_eq!(backoff_delay(&policy, 1), policy.base_delay);
        assert_eq!(backoff_delay(&policy, 3), policy.base_delay);
    }

    #[test]
    fn test_linear_policy_uses_base_delay() {
        let policy = RetryPolicy {
            exponential_backoff: false,
            ..unstable()
        };
        assert_eq!(backoff_delay(&policy, 7), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = unstable();
        assert_eq!(backoff_delay(&policy, u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_apply_jitter_clamps_fraction() {
        let delay = Duration::from_secs(100);
        assert_eq!(apply_jitter(delay, 0.05), Duration::from_secs(105));
        assert_eq!(apply_jitter(delay, 5.0), Duration::from_secs(110));
        assert_eq!(apply_jitter(delay, -1.0), delay);
    }

    #[test]
    fn test_total_budget() {
        // 30 + 60 + 120 + 240 + 6 * 300 = 2250s, capped by the 30m timeout
        assert_eq!(total_budget(&unstable()), Duration::from_secs(1800));

        let short = RetryPolicy {
            max_retries: 3,
            ..unstable()
        };
        assert_eq!(total_budget(&short), Duration::from_secs(210));

        let dirty = RetryPolicy::default_for(MergeableState::Dirty);
        assert_eq!(total_budget(&dirty), Duration::ZERO);
    }
}
