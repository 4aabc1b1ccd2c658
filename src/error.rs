//! Error types surfaced at the bus boundary.

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a subscription handler.
///
/// Handlers are not required to produce a typed error hierarchy — the bus
/// only ever needs a human-readable message, which it appends to an event's
/// error history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HandlerError {}

/// Errors from the persistence backend. The core never constructs these
/// directly; they flow up from whatever `Store` implementation is in use.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {0} not found")]
    NotFound(Uuid),
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Errors surfaced at the bus's public API.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// `publish`/`subscribe` called after `shutdown()` has started.
    #[error("event bus is shutting down")]
    ShuttingDown,

    /// The payload could not be serialized to JSON.
    #[error("payload is not serializable as JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// A DLQ-retry was requested for an event id that does not exist.
    #[error("event {0} not found")]
    NotFound(Uuid),

    /// A DLQ-retry was requested for an event that is not currently in the DLQ.
    #[error("event {0} is not in the dead-letter queue")]
    NotInDlq(Uuid),

    /// The durable store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}
