//! Structured retry-log entries (§6), emitted through `tracing` and also
//! through an injectable sink for embedders that want structured values
//! rather than parsed log lines.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

/// One failed-attempt record, matching §6's schema exactly.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetryLogEntry {
    pub level: &'static str,
    pub event_id: Uuid,
    pub event_type: String,
    pub subscription_id: Uuid,
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub error: String,
}

impl RetryLogEntry {
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        subscription_id: Uuid,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            level: "warn",
            event_id,
            event_type: event_type.into(),
            subscription_id,
            attempt,
            max_attempts,
            delay_ms,
            error: error.into(),
        }
    }
}

/// Narrow analogue of a `tower::Service<PolicyEvent>`-style telemetry sink,
/// scoped to exactly the one schema this bus needs.
#[async_trait]
pub trait RetryLogSink: Send + Sync {
    async fn record(&self, entry: RetryLogEntry);
}

/// Default sink: emits through `tracing::warn!` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryLogSink;

#[async_trait]
impl RetryLogSink for TracingRetryLogSink {
    async fn record(&self, entry: RetryLogEntry) {
        tracing::warn!(
            event_id = %entry.event_id,
            event_type = %entry.event_type,
            subscription_id = %entry.subscription_id,
            attempt = entry.attempt,
            max_attempts = entry.max_attempts,
            delay_ms = entry.delay_ms,
            error = %entry.error,
            "handler attempt failed"
        );
    }
}

/// Test double that records every entry for later assertion.
#[derive(Debug, Default)]
pub struct MemoryRetryLogSink {
    entries: Mutex<Vec<RetryLogEntry>>,
}

impl MemoryRetryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<RetryLogEntry> {
        self.entries.lock().expect("retry log sink mutex poisoned").clone()
    }
}

#[async_trait]
impl RetryLogSink for MemoryRetryLogSink {
    async fn record(&self, entry: RetryLogEntry) {
        self.entries.lock().expect("retry log sink mutex poisoned").push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_records_entries_in_order() {
        let sink = MemoryRetryLogSink::new();
        let event_id = Uuid::new_v4();
        let sub_id = Uuid::new_v4();

        sink.record(RetryLogEntry::new(event_id, "order.created", sub_id, 1, 4, 10, "boom-1")).await;
        sink.record(RetryLogEntry::new(event_id, "order.created", sub_id, 2, 4, 20, "boom-2")).await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt, 1);
        assert_eq!(entries[1].attempt, 2);
        assert_eq!(entries[0].level, "warn");
    }

    #[tokio::test]
    async fn tracing_sink_does_not_panic() {
        let sink = TracingRetryLogSink;
        sink.record(RetryLogEntry::new(Uuid::new_v4(), "order.created", Uuid::new_v4(), 1, 1, 0, "boom")).await;
    }
}
