//! The persistence contract (§6) and an in-memory reference implementation.
//!
//! The core never assumes a particular backend; `eventbus-sqlite` is one
//! concrete implementation of this trait, shipped as a separate crate.

use crate::error::StoreError;
use crate::event::{Event, EventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The durable, non-handler fields of a subscription — a traceability record
/// only. The in-memory handler map is the sole source of truth for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

/// Narrow persistence interface the dispatcher and bus depend on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;
    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;
    async fn update_status(&self, id: Uuid, status: EventStatus) -> Result<(), StoreError>;
    async fn update_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        error_history: &[String],
    ) -> Result<(), StoreError>;
    /// Atomically sets `status=dlq`, `dlq_at=now`, and `last_error`.
    async fn move_to_dlq(&self, id: Uuid, error_history: &[String]) -> Result<(), StoreError>;
    async fn events_by_status(&self, status: EventStatus) -> Result<Vec<Event>, StoreError>;

    async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;
    async fn delete_subscription(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, StoreError>;

    /// DLQ events, newest `created_at` first.
    async fn list_dlq(&self, offset: usize, limit: usize) -> Result<Vec<Event>, StoreError>;
    async fn count_dlq(&self) -> Result<usize, StoreError>;
    /// `status -> pending, retry_count -> 0, last_error -> null, dlq_at -> null`.
    async fn reset_dlq_event(&self, id: Uuid) -> Result<(), StoreError>;
    /// Deletes dlq rows with `created_at <= cutoff`. Returns the count deleted.
    async fn purge_dlq(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Releases backend resources (connection pools, file handles). Called by
    /// `Bus::shutdown` once the drain budget has elapsed or been exhausted.
    /// The default no-op suits backends with nothing to release.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory reference `Store`. Used by the core crate's own dispatcher/bus
/// tests and exported so downstream users can unit-test handlers without the
/// SQLite backend.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        events: Mutex<HashMap<Uuid, Event>>,
        subscriptions: Mutex<HashMap<Uuid, SubscriptionRecord>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed an event directly, bypassing `insert_event` — used by crash
        /// recovery tests that need to start with a pre-existing row.
        pub fn seed(&self, event: Event) {
            self.events.lock().expect("memory store mutex poisoned").insert(event.id, event);
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
            self.events
                .lock()
                .expect("memory store mutex poisoned")
                .insert(event.id, event.clone());
            Ok(())
        }

        async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
            Ok(self.events.lock().expect("memory store mutex poisoned").get(&id).cloned())
        }

        async fn update_status(&self, id: Uuid, status: EventStatus) -> Result<(), StoreError> {
            let mut events = self.events.lock().expect("memory store mutex poisoned");
            let event = events.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            event.status = status;
            event.updated_at = Utc::now();
            Ok(())
        }

        async fn update_retry(
            &self,
            id: Uuid,
            retry_count: u32,
            error_history: &[String],
        ) -> Result<(), StoreError> {
            let mut events = self.events.lock().expect("memory store mutex poisoned");
            let event = events.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            event.retry_count = retry_count;
            event.last_error = Some(error_history.to_vec());
            event.updated_at = Utc::now();
            Ok(())
        }

        async fn move_to_dlq(&self, id: Uuid, error_history: &[String]) -> Result<(), StoreError> {
            let mut events = self.events.lock().expect("memory store mutex poisoned");
            let event = events.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            let now = Utc::now();
            event.status = EventStatus::Dlq;
            event.last_error = Some(error_history.to_vec());
            event.dlq_at = Some(now);
            event.updated_at = now;
            Ok(())
        }

        async fn events_by_status(&self, status: EventStatus) -> Result<Vec<Event>, StoreError> {
            Ok(self
                .events
                .lock()
                .expect("memory store mutex poisoned")
                .values()
                .filter(|e| e.status == status)
                .cloned()
                .collect())
        }

        async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
            self.subscriptions
                .lock()
                .expect("memory store mutex poisoned")
                .insert(record.id, record.clone());
            Ok(())
        }

        async fn delete_subscription(&self, id: Uuid) -> Result<(), StoreError> {
            self.subscriptions.lock().expect("memory store mutex poisoned").remove(&id);
            Ok(())
        }

        async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
            Ok(self
                .subscriptions
                .lock()
                .expect("memory store mutex poisoned")
                .values()
                .cloned()
                .collect())
        }

        async fn list_dlq(&self, offset: usize, limit: usize) -> Result<Vec<Event>, StoreError> {
            let mut dlq: Vec<Event> = self
                .events
                .lock()
                .expect("memory store mutex poisoned")
                .values()
                .filter(|e| e.status == EventStatus::Dlq)
                .cloned()
                .collect();
            dlq.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(dlq.into_iter().skip(offset).take(limit).collect())
        }

        async fn count_dlq(&self) -> Result<usize, StoreError> {
            Ok(self
                .events
                .lock()
                .expect("memory store mutex poisoned")
                .values()
                .filter(|e| e.status == EventStatus::Dlq)
                .count())
        }

        async fn reset_dlq_event(&self, id: Uuid) -> Result<(), StoreError> {
            let mut events = self.events.lock().expect("memory store mutex poisoned");
            let event = events.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            event.status = EventStatus::Pending;
            event.retry_count = 0;
            event.last_error = None;
            event.dlq_at = None;
            event.updated_at = Utc::now();
            Ok(())
        }

        async fn purge_dlq(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            let mut events = self.events.lock().expect("memory store mutex poisoned");
            let to_delete: Vec<Uuid> = events
                .values()
                .filter(|e| e.status == EventStatus::Dlq && e.created_at <= cutoff)
                .map(|e| e.id)
                .collect();
            for id in &to_delete {
                events.remove(id);
            }
            Ok(to_delete.len())
        }
    }

}
