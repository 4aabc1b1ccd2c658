#![forbid(unsafe_code)]

//! An in-process, durable event bus for small services and command-line
//! tools that need reliable event processing without external brokers.
//!
//! Publishers submit typed events; subscribers register handlers keyed by
//! glob patterns; the bus guarantees that every accepted event is either
//! delivered successfully or preserved in a dead-letter queue with full
//! diagnostic context, surviving process crashes via persistent storage.
//!
//! The core depends only on a narrow [`Store`] trait; `eventbus-sqlite`
//! ships one concrete, WAL-mode SQLite implementation of it.
//!
//! ## Quick start
//!
//! ```rust
//! use async_trait::async_trait;
//! use eventbus::{Bus, BusConfig, Event, Handler, HandlerError, MemoryStore, SubscribeOptions};
//! use std::sync::Arc;
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl Handler for PrintHandler {
//!     async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
//!         println!("got {}: {}", event.event_type, event.payload);
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = Bus::new(Arc::new(MemoryStore::new()), BusConfig::default());
//! bus.subscribe(Some("order.created".into()), Arc::new(PrintHandler), SubscribeOptions::default())
//!     .await
//!     .unwrap();
//! bus.publish("order.created", serde_json::json!({"id": 42}), None).await.unwrap();
//! bus.shutdown().await.unwrap();
//! # }
//! ```

mod backoff;
mod bus;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
mod dispatcher;
mod dlq;
mod error;
mod event;
mod handler;
mod jitter;
mod matcher;
mod metrics;
mod retry_log;
mod retry_policy;
mod sleeper;
mod store;
mod subscription;

pub use backoff::Backoff;
pub use bus::{Bus, BusConfig, DEFAULT_SHUTDOWN_DRAIN};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use dispatcher::Dispatcher;
pub use dlq::{DlqReader, DEFAULT_PAGE_SIZE};
pub use error::{EventBusError, HandlerError, StoreError};
pub use event::{Event, EventStatus};
pub use handler::{FnHandler, Handler};
pub use jitter::Jitter;
pub use matcher::matches;
pub use metrics::{MetricsRegistry, RetryMetrics};
pub use retry_log::{MemoryRetryLogSink, RetryLogEntry, RetryLogSink, TracingRetryLogSink};
pub use retry_policy::{RetryOverride, RetryPolicy};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{Store, SubscriptionRecord};
pub use subscription::{SubscribeOptions, Subscription, DEFAULT_HANDLER_TIMEOUT};

#[cfg(any(test, feature = "test-util"))]
pub use store::memory::MemoryStore;
