//! The event record: the unit of work carried through the bus.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of an event. Forms the DAG
/// `pending -> processing -> done`, `processing -> dlq`, `dlq -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Done,
    Dlq,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Done => "done",
            EventStatus::Dlq => "dlq",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted unit of work.
///
/// `retry_count` and `last_error` are kept in lockstep by the dispatcher:
/// after any failed attempt, `retry_count == last_error.len()`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: Option<HashMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: EventStatus,
    pub retry_count: u32,
    pub last_error: Option<Vec<String>>,
    pub dlq_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Construct a fresh, unpersisted event in `pending` status.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        metadata: Option<HashMap<String, String>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            metadata,
            created_at: now,
            updated_at: now,
            status: EventStatus::Pending,
            retry_count: 0,
            last_error: None,
            dlq_at: None,
        }
    }

    /// Number of recorded failures; invariant with `last_error.len()`.
    pub fn failure_count(&self) -> usize {
        self.last_error.as_ref().map_or(0, |errs| errs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_starts_pending_with_no_failures() {
        let event = Event::new("order.created", serde_json::json!({"id": 42}), None);
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert!(event.last_error.is_none());
        assert!(event.dlq_at.is_none());
        assert_eq!(event.created_at, event.updated_at);
    }

    #[test]
    fn failure_count_tracks_last_error_length() {
        let mut event = Event::new("order.created", serde_json::json!(null), None);
        assert_eq!(event.failure_count(), 0);
        event.last_error = Some(vec!["boom-1".into(), "boom-2".into()]);
        assert_eq!(event.failure_count(), 2);
    }

    #[test]
    fn status_display_matches_wire_strings() {
        assert_eq!(EventStatus::Pending.to_string(), "pending");
        assert_eq!(EventStatus::Processing.to_string(), "processing");
        assert_eq!(EventStatus::Done.to_string(), "done");
        assert_eq!(EventStatus::Dlq.to_string(), "dlq");
    }
}
