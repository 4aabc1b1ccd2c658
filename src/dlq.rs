//! Administrative dead-letter-queue reader: a thin wrapper over the
//! persistence contract's DLQ operations (§6). Not a CLI/HTTP surface —
//! just the focused API an embedding binary would wire into one.

use crate::error::EventBusError;
use crate::event::{Event, EventStatus};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Default page size for `list` (§6).
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub struct DlqReader {
    store: Arc<dyn Store>,
}

impl DlqReader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Newest `created_at` first.
    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Event>, EventBusError> {
        Ok(self.store.list_dlq(offset, limit).await?)
    }

    pub async fn count(&self) -> Result<usize, EventBusError> {
        Ok(self.store.count_dlq().await?)
    }

    /// Resets an event to `pending` for redelivery. Fails if `id` is unknown
    /// or not currently in the DLQ.
    pub async fn retry(&self, id: Uuid) -> Result<(), EventBusError> {
        let event = self.store.get_event(id).await?.ok_or(EventBusError::NotFound(id))?;
        if event.status != EventStatus::Dlq {
            return Err(EventBusError::NotInDlq(id));
        }
        self.store.reset_dlq_event(id).await?;
        Ok(())
    }

    /// Deletes dlq rows with `created_at <= cutoff`; retention always keys
    /// off `created_at`, never `dlq_at` (§3).
    pub async fn purge(&self, cutoff: DateTime<Utc>) -> Result<usize, EventBusError> {
        Ok(self.store.purge_dlq(cutoff).await?)
    }
}
