//! The façade (§4.6): publish, subscribe, crash recovery, and a bounded
//! shutdown drain over the dispatcher and persistence contract.

use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::error::EventBusError;
use crate::event::{Event, EventStatus};
use crate::handler::Handler;
use crate::retry_log::{RetryLogSink, TracingRetryLogSink};
use crate::retry_policy::RetryPolicy;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{Store, SubscriptionRecord};
use crate::subscription::{SubscribeOptions, Subscription};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Default bounded shutdown drain (§6).
pub const DEFAULT_SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct BusConfig {
    pub shutdown_drain: Duration,
    pub default_retry: RetryPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            shutdown_drain: DEFAULT_SHUTDOWN_DRAIN,
            default_retry: RetryPolicy::default(),
        }
    }
}

/// Tracks outstanding dispatches so `shutdown` can race them against a
/// bounded drain. A dispatch enters on spawn and exits on completion,
/// regardless of whether the publisher is still awaiting its result.
struct InFlight {
    count: AtomicUsize,
    notify: Notify,
}

impl InFlight {
    fn new() -> Self {
        Self { count: AtomicUsize::new(0), notify: Notify::new() }
    }

    /// Waits until the in-flight count reaches zero or `timeout` elapses.
    /// Returns `true` if fully drained.
    async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking the count: notify_waiters()
            // stores no permit, so a guard dropping between the check and the
            // await would otherwise be missed.
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return false;
            }
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.notify.notify_waiters();
        }
    }
}

/// Claims one in-flight slot; the slot is released when the guard drops.
fn enter_in_flight(in_flight: &Arc<InFlight>) -> InFlightGuard {
    in_flight.count.fetch_add(1, Ordering::SeqCst);
    InFlightGuard(in_flight.clone())
}

/// The public entry point of the crate.
pub struct Bus {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    config: BusConfig,
    drained: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

impl Bus {
    pub fn new(store: Arc<dyn Store>, config: BusConfig) -> Self {
        Self::with_clock_and_sleeper(store, config, Arc::new(crate::clock::MonotonicClock::default()), Arc::new(TokioSleeper))
    }

    pub fn with_clock_and_sleeper(
        store: Arc<dyn Store>,
        config: BusConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            clock,
            Arc::new(TracingRetryLogSink) as Arc<dyn RetryLogSink>,
            sleeper,
            config.default_retry,
        ));
        Self { store, dispatcher, config, drained: Arc::new(AtomicBool::new(false)), in_flight: Arc::new(InFlight::new()) }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Persists a fresh event and drives it through the dispatcher. Resolves
    /// once the event reaches a terminal status, even if the caller never
    /// polls the returned future again: the dispatch is spawned immediately
    /// and tracked by the in-flight set.
    pub async fn publish<T: Serialize>(
        &self,
        event_type: impl Into<String>,
        payload: T,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Uuid, EventBusError> {
        if self.drained.load(Ordering::SeqCst) {
            return Err(EventBusError::ShuttingDown);
        }

        let payload = serde_json::to_value(payload).map_err(EventBusError::InvalidPayload)?;
        let event = Event::new(event_type, payload, metadata);
        let id = event.id;
        self.store.insert_event(&event).await?;

        let dispatcher = self.dispatcher.clone();
        let in_flight = self.in_flight.clone();
        let handle = tokio::spawn(async move {
            let _guard = enter_in_flight(&in_flight);
            dispatcher.dispatch(event).await
        });

        match handle.await {
            Ok(result) => result?,
            Err(_join_error) => {}
        }
        Ok(id)
    }

    /// Registers a handler. `pattern = None` is treated as `*`.
    pub async fn subscribe(
        &self,
        pattern: Option<String>,
        handler: Arc<dyn Handler>,
        options: SubscribeOptions,
    ) -> Result<Uuid, EventBusError> {
        if self.drained.load(Ordering::SeqCst) {
            return Err(EventBusError::ShuttingDown);
        }

        let pattern = pattern.unwrap_or_else(|| "*".to_string());
        let subscription = Subscription::new(pattern.clone(), handler, options);
        let id = subscription.id;
        let record = SubscriptionRecord { id, event_type: pattern, created_at: subscription.created_at };
        self.store.insert_subscription(&record).await?;
        self.dispatcher.add_subscription(subscription);
        Ok(id)
    }

    /// Idempotent: removing an unknown id is a no-op.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), EventBusError> {
        self.dispatcher.remove_subscription(id);
        self.store.delete_subscription(id).await?;
        Ok(())
    }

    /// Crash recovery: re-enters the dispatch loop for every event left in
    /// `processing` by a prior, uncleanly terminated process.
    pub async fn start(&self) -> Result<(), EventBusError> {
        let stuck = self.store.events_by_status(EventStatus::Processing).await?;
        for mut event in stuck {
            let mut errors = event.last_error.clone().unwrap_or_default();
            // Pad up to the event's recorded retry_count first: seed data (or
            // a store bug) may have left last_error shorter than retry_count,
            // and the invariant that the two stay in lockstep must hold after
            // this push, not just account for the one new entry.
            while errors.len() < event.retry_count as usize {
                errors.push("event was left in processing by a prior attempt".to_string());
            }
            errors.push("event was left in processing by a prior attempt".to_string());
            event.retry_count += 1;
            self.store.update_retry(event.id, event.retry_count, &errors).await?;
            self.store.update_status(event.id, EventStatus::Pending).await?;
            event.last_error = Some(errors);
            event.status = EventStatus::Pending;

            let _guard = enter_in_flight(&self.in_flight);
            self.dispatcher.dispatch(event).await?;
        }
        Ok(())
    }

    /// Idempotent. Rejects new `publish`/`subscribe` immediately, then races
    /// the in-flight dispatch set against the configured drain budget.
    /// Dispatches still running when the budget elapses are abandoned, not
    /// cancelled (§5).
    pub async fn shutdown(&self) -> Result<(), EventBusError> {
        if self.drained.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.in_flight.drain(self.config.shutdown_drain).await;
        self.store.close().await?;
        Ok(())
    }
}
