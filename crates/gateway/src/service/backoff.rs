//! Reconnect backoff strategies (§4.2): fixed, linear, and exponential
//! growth with an optional bounded jitter.

use std::time::Duration;

use crate::config::{BackoffStrategy, ReconnectPolicy};

/// Computes the delay before the Nth reconnect attempt (1-indexed) for a
/// given [`ReconnectPolicy`]. No external randomness source is introduced
/// for jitter — a small deterministic xorshift keyed on the attempt number
/// is used instead, avoiding a new dependency for a cosmetic feature while
/// still spreading concurrent reconnects apart.
pub fn compute_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let base_ms = match policy.strategy {
        BackoffStrategy::Fixed => policy.initial_delay_ms as f64,
        BackoffStrategy::Linear => policy.initial_delay_ms as f64 * policy.multiplier.max(1.0) * attempt.max(1) as f64,
        BackoffStrategy::Exponential => policy.initial_delay_ms as f64 * policy.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32),
    };

    let capped_ms = base_ms.min(policy.max_delay_ms as f64);
    let jittered_ms = apply_jitter(capped_ms, policy.jitter_amount, attempt);

    Duration::from_millis(jittered_ms.round().max(0.0) as u64)
}

fn apply_jitter(base_ms: f64, jitter_amount: f64, seed: u32) -> f64 {
    if jitter_amount <= 0.0 {
        return base_ms;
    }
    let unit = deterministic_unit_interval(seed);
    let spread = base_ms * jitter_amount.min(1.0);
    base_ms - spread / 2.0 + unit * spread
}

/// A cheap, seed-dependent value in `[0.0, 1.0)`. Not cryptographically
/// random; only used to spread reconnect timers, not for anything
/// security-sensitive.
fn deterministic_unit_interval(seed: u32) -> f64 {
    let mut x = seed.wrapping_mul(2_654_435_761).wrapping_add(0x9E37_79B9);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    (x as f64) / (u32::MAX as f64)
}

/// Whether `attempt` has exhausted the policy's `max_attempts`, at which
/// point the service transitions to `Failed` instead of scheduling another
/// reconnect timer.
pub fn attempts_exhausted(policy: &ReconnectPolicy, attempt: u32) -> bool {
    attempt >= policy.max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> ReconnectPolicy {
        ReconnectPolicy {
            strategy,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_attempts: 5,
            jitter_amount: 0.0,
        }
    }

    #[test]
    fn fixed_strategy_never_grows() {
        let p = policy(BackoffStrategy::Fixed);
        assert_eq!(compute_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(compute_delay(&p, 5), Duration::from_millis(100));
    }

    #[test]
    fn linear_strategy_grows_proportionally() {
        let p = policy(BackoffStrategy::Linear);
        assert_eq!(compute_delay(&p, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&p, 3), Duration::from_millis(600));
    }

    #[test]
    fn exponential_strategy_doubles_and_caps() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(compute_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(compute_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(compute_delay(&p, 3), Duration::from_millis(400));

        let capped = policy(BackoffStrategy::Exponential);
        assert!(compute_delay(&capped, 20) <= Duration::from_millis(capped.max_delay_ms));
    }

    #[test]
    fn max_attempts_is_honored() {
        let p = policy(BackoffStrategy::Fixed);
        assert!(!attempts_exhausted(&p, 4));
        assert!(attempts_exhausted(&p, 5));
        assert!(attempts_exhausted(&p, 6));
    }
}
