#![forbid(unsafe_code)]

//! SQLite-backed `Store` implementation, using write-ahead journaling for
//! concurrent reads during writes. This is the one concrete persistence
//! backend the core crate ships; the dispatcher and bus never reference this
//! crate directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventbus::{Event, EventStatus, Store, StoreError, SubscriptionRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path`, enables WAL mode,
    /// and runs the crate's migrations.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(StoreError::backend)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await.map_err(StoreError::backend)?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(StoreError::backend)?;

        Ok(Self { pool })
    }

    /// In-memory SQLite database, useful for tests that still want to
    /// exercise the real SQL backend rather than `eventbus::MemoryStore`.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::backend)?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(StoreError::backend)?;
        Ok(Self { pool })
    }
}

fn status_str(status: EventStatus) -> &'static str {
    status.as_str()
}

fn parse_status(raw: &str) -> EventStatus {
    match raw {
        "pending" => EventStatus::Pending,
        "processing" => EventStatus::Processing,
        "done" => EventStatus::Done,
        _ => EventStatus::Dlq,
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event, StoreError> {
    let id: String = row.try_get("id").map_err(StoreError::backend)?;
    let event_type: String = row.try_get("type").map_err(StoreError::backend)?;
    let payload_raw: String = row.try_get("payload").map_err(StoreError::backend)?;
    let status_raw: String = row.try_get("status").map_err(StoreError::backend)?;
    let retry_count: i64 = row.try_get("retry_count").map_err(StoreError::backend)?;
    let last_error_raw: Option<String> = row.try_get("last_error").map_err(StoreError::backend)?;
    let metadata_raw: Option<String> = row.try_get("metadata").map_err(StoreError::backend)?;
    let created_at: String = row.try_get("created_at").map_err(StoreError::backend)?;
    let updated_at: String = row.try_get("updated_at").map_err(StoreError::backend)?;
    let dlq_at: Option<String> = row.try_get("dlq_at").map_err(StoreError::backend)?;

    Ok(Event {
        id: Uuid::parse_str(&id).map_err(StoreError::backend)?,
        event_type,
        payload: serde_json::from_str(&payload_raw).map_err(StoreError::backend)?,
        metadata: metadata_raw.map(|raw| serde_json::from_str(&raw)).transpose().map_err(StoreError::backend)?,
        created_at: DateTime::parse_from_rfc3339(&created_at).map_err(StoreError::backend)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at).map_err(StoreError::backend)?.with_timezone(&Utc),
        status: parse_status(&status_raw),
        retry_count: retry_count as u32,
        last_error: last_error_raw.map(|raw| serde_json::from_str(&raw)).transpose().map_err(StoreError::backend)?,
        dlq_at: dlq_at
            .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(StoreError::backend)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&event.payload).map_err(StoreError::backend)?;
        let metadata = event.metadata.as_ref().map(serde_json::to_string).transpose().map_err(StoreError::backend)?;
        let last_error = event.last_error.as_ref().map(serde_json::to_string).transpose().map_err(StoreError::backend)?;

        sqlx::query(
            "INSERT INTO events (id, type, payload, status, retry_count, last_error, metadata, created_at, updated_at, dlq_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(&event.event_type)
        .bind(payload)
        .bind(status_str(event.status))
        .bind(event.retry_count as i64)
        .bind(last_error)
        .bind(metadata)
        .bind(event.created_at.to_rfc3339())
        .bind(event.updated_at.to_rfc3339())
        .bind(event.dlq_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn update_status(&self, id: Uuid, status: EventStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE events SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status_str(status))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn update_retry(&self, id: Uuid, retry_count: u32, error_history: &[String]) -> Result<(), StoreError> {
        let errors = serde_json::to_string(error_history).map_err(StoreError::backend)?;
        let result = sqlx::query("UPDATE events SET retry_count = ?, last_error = ?, updated_at = ? WHERE id = ?")
            .bind(retry_count as i64)
            .bind(errors)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn move_to_dlq(&self, id: Uuid, error_history: &[String]) -> Result<(), StoreError> {
        let errors = serde_json::to_string(error_history).map_err(StoreError::backend)?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE events SET status = 'dlq', last_error = ?, dlq_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(errors)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn events_by_status(&self, status: EventStatus) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE status = ?")
            .bind(status_str(status))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO subscriptions (id, event_type, created_at) VALUES (?, ?, ?)")
            .bind(record.id.to_string())
            .bind(&record.event_type)
            .bind(record.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete_subscription(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, event_type, created_at FROM subscriptions")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(StoreError::backend)?;
                let event_type: String = row.try_get("event_type").map_err(StoreError::backend)?;
                let created_at: String = row.try_get("created_at").map_err(StoreError::backend)?;
                Ok(SubscriptionRecord {
                    id: Uuid::parse_str(&id).map_err(StoreError::backend)?,
                    event_type,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map_err(StoreError::backend)?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    async fn list_dlq(&self, offset: usize, limit: usize) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE status = 'dlq' ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn count_dlq(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM events WHERE status = 'dlq'")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let n: i64 = row.try_get("n").map_err(StoreError::backend)?;
        Ok(n as usize)
    }

    async fn reset_dlq_event(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE events SET status = 'pending', retry_count = 0, last_error = NULL, dlq_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn purge_dlq(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM events WHERE status = 'dlq' AND created_at <= ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(result.rows_affected() as usize)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
