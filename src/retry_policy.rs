//! Retry policy value object: defaults, per-subscription overrides, merge
//! rules across overlapping subscriptions, and delay-with-jitter calculation.

use crate::jitter::Jitter;
use std::time::Duration;

/// A full retry policy. `max_retries` counts *failed* attempts allowed
/// beyond the first try, so `max_attempts = max_retries + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Overlay a partial override onto this policy, field by field.
    fn overlay(&self, over: &RetryOverride) -> RetryPolicy {
        RetryPolicy {
            max_retries: over.max_retries.unwrap_or(self.max_retries),
            base_delay: over.base_delay.unwrap_or(self.base_delay),
            max_delay: over.max_delay.unwrap_or(self.max_delay),
            backoff_multiplier: over.backoff_multiplier.unwrap_or(self.backoff_multiplier),
        }
    }

    /// Delay before the given 1-indexed attempt, with ±10% jitter (§4.3).
    /// `delay(1) == 0`; the first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let multiplier = self.backoff_multiplier.max(1.0).powi(exponent);
        let raw_millis =
            (self.base_delay.as_millis() as f64 * multiplier).min(self.max_delay.as_millis() as f64);
        let raw = Duration::from_millis(raw_millis.round() as u64);
        Jitter::bounded(0.1).apply(raw)
    }

    /// Merge the defaults with every matching subscription's override using
    /// the most-permissive operator per field (§4.2). Matches the source
    /// codebase's existing `Backoff`/`Jitter` merge-free design by computing
    /// one effective policy rather than mutating any subscription's config.
    pub fn merge<'a>(defaults: &RetryPolicy, overrides: impl IntoIterator<Item = &'a RetryOverride>) -> RetryPolicy {
        let mut overrides = overrides.into_iter().peekable();
        if overrides.peek().is_none() {
            return *defaults;
        }

        overrides
            .map(|o| defaults.overlay(o))
            .reduce(|a, b| RetryPolicy {
                max_retries: a.max_retries.max(b.max_retries),
                base_delay: a.base_delay.min(b.base_delay),
                max_delay: a.max_delay.max(b.max_delay),
                backoff_multiplier: a.backoff_multiplier.max(b.backoff_multiplier),
            })
            .expect("peeked non-empty iterator yields at least one merged policy")
    }
}

/// A partial retry policy a subscription may supply to override defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetryOverride {
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.backoff_multiplier, 2.0);
        assert_eq!(p.max_attempts(), 4);
    }

    #[test]
    fn delay_of_first_attempt_is_zero() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let p = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        };

        // attempt 2: raw = 10ms, attempt 3: raw = 20ms, attempt 4: raw = 40ms
        for (attempt, raw_ms) in [(2u32, 10.0_f64), (3, 20.0), (4, 40.0)] {
            let d = p.delay_for_attempt(attempt);
            let lower = (raw_ms * 0.9).floor() as u64;
            let upper = (raw_ms * 1.1).ceil() as u64;
            assert!(
                d.as_millis() as u64 >= lower && d.as_millis() as u64 <= upper,
                "attempt {attempt}: {d:?} not within [{lower}, {upper}]ms"
            );
        }
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        let d = p.delay_for_attempt(10);
        assert!(d.as_millis() as u64 <= 550);
    }

    #[test]
    fn no_overrides_uses_defaults() {
        let merged = RetryPolicy::merge(&RetryPolicy::default(), std::iter::empty());
        assert_eq!(merged, RetryPolicy::default());
    }

    #[test]
    fn single_override_overlays_onto_defaults() {
        let over = RetryOverride { max_retries: Some(5), ..Default::default() };
        let merged = RetryPolicy::merge(&RetryPolicy::default(), [&over]);
        assert_eq!(merged.max_retries, 5);
        assert_eq!(merged.base_delay, RetryPolicy::default().base_delay);
    }

    #[test]
    fn merge_is_most_permissive_across_overrides() {
        let a = RetryOverride {
            max_retries: Some(1),
            base_delay: Some(Duration::from_millis(500)),
            max_delay: Some(Duration::from_secs(10)),
            backoff_multiplier: Some(1.5),
        };
        let b = RetryOverride {
            max_retries: Some(4),
            base_delay: Some(Duration::from_millis(100)),
            max_delay: Some(Duration::from_secs(60)),
            backoff_multiplier: Some(3.0),
        };
        let merged = RetryPolicy::merge(&RetryPolicy::default(), [&a, &b]);
        assert_eq!(merged.max_retries, 4); // max
        assert_eq!(merged.base_delay, Duration::from_millis(100)); // min
        assert_eq!(merged.max_delay, Duration::from_secs(60)); // max
        assert_eq!(merged.backoff_multiplier, 3.0); // max
    }

    #[test]
    fn merged_policy_never_more_restrictive_than_any_single_override() {
        let a = RetryOverride { max_retries: Some(1), ..Default::default() };
        let b = RetryOverride { max_retries: Some(4), ..Default::default() };
        let merged = RetryPolicy::merge(&RetryPolicy::default(), [&a, &b]);
        let full_a = RetryPolicy::default().overlay(&a);
        let full_b = RetryPolicy::default().overlay(&b);
        assert!(merged.max_retries >= full_a.max_retries);
        assert!(merged.max_retries >= full_b.max_retries);
        assert!(merged.base_delay <= full_a.base_delay);
        assert!(merged.base_delay <= full_b.base_delay);
    }
}
