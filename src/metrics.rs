//! Per-event-type running totals. All operations are O(1).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub success_after_retry: u64,
    pub dlq_count: u64,
    pub observed: u64,
}

/// Process-scoped, exclusively owned by the dispatcher/bus (§5).
#[derive(Default)]
pub struct MetricsRegistry {
    by_type: Mutex<HashMap<String, RetryMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<R>(&self, event_type: &str, f: impl FnOnce(&mut RetryMetrics) -> R) -> R {
        let mut by_type = self.by_type.lock().expect("metrics mutex poisoned");
        f(by_type.entry(event_type.to_string()).or_default())
    }

    pub fn record_observed(&self, event_type: &str) {
        self.with_entry(event_type, |m| m.observed += 1);
    }

    pub fn record_retries(&self, event_type: &str, count: u64) {
        if count > 0 {
            self.with_entry(event_type, |m| m.total_retries += count);
        }
    }

    pub fn record_success_after_retry(&self, event_type: &str) {
        self.with_entry(event_type, |m| m.success_after_retry += 1);
    }

    pub fn record_dlq(&self, event_type: &str) {
        self.with_entry(event_type, |m| m.dlq_count += 1);
    }

    pub fn snapshot(&self, event_type: &str) -> RetryMetrics {
        self.by_type
            .lock()
            .expect("metrics mutex poisoned")
            .get(event_type)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_reports_zeroed_metrics() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot("order.created"), RetryMetrics::default());
    }

    #[test]
    fn observed_and_retries_accumulate_per_type() {
        let registry = MetricsRegistry::new();
        registry.record_observed("order.created");
        registry.record_observed("order.created");
        registry.record_retries("order.created", 3);
        registry.record_success_after_retry("order.created");

        let snapshot = registry.snapshot("order.created");
        assert_eq!(snapshot.observed, 2);
        assert_eq!(snapshot.total_retries, 3);
        assert_eq!(snapshot.success_after_retry, 1);
    }

    #[test]
    fn distinct_types_are_isolated() {
        let registry = MetricsRegistry::new();
        registry.record_dlq("order.created");
        assert_eq!(registry.snapshot("order.created").dlq_count, 1);
        assert_eq!(registry.snapshot("order.updated").dlq_count, 0);
    }

    #[test]
    fn zero_retries_does_not_create_an_entry() {
        let registry = MetricsRegistry::new();
        registry.record_retries("order.created", 0);
        assert_eq!(registry.snapshot("order.created"), RetryMetrics::default());
    }
}
