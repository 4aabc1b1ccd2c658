//! The dispatch engine (§4.5): matches subscriptions, filters by circuit
//! admission, runs handlers sequentially with per-handler timeouts, retries
//! with backoff, and routes exhausted events to the DLQ.

use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::clock::Clock;
use crate::error::{EventBusError, HandlerError, StoreError};
use crate::event::{Event, EventStatus};
use crate::matcher;
use crate::metrics::MetricsRegistry;
use crate::retry_log::{RetryLogEntry, RetryLogSink};
use crate::retry_policy::RetryPolicy;
use crate::sleeper::Sleeper;
use crate::store::Store;
use crate::subscription::Subscription;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Owns the per-subscription handler map and drives individual events to a
/// terminal state. Shared, process-scoped state (§5): circuits, metrics, and
/// the subscription registry are exclusively owned here.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    subscriptions: RwLock<Vec<Subscription>>,
    circuits: CircuitBreakerRegistry,
    metrics: MetricsRegistry,
    retry_log: Arc<dyn RetryLogSink>,
    sleeper: Arc<dyn Sleeper>,
    default_retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        retry_log: Arc<dyn RetryLogSink>,
        sleeper: Arc<dyn Sleeper>,
        default_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            subscriptions: RwLock::new(Vec::new()),
            circuits: CircuitBreakerRegistry::new(clock),
            metrics: MetricsRegistry::new(),
            retry_log,
            sleeper,
            default_retry,
        }
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .expect("subscription registry mutex poisoned")
            .push(subscription);
    }

    pub fn remove_subscription(&self, id: uuid::Uuid) {
        self.subscriptions
            .write()
            .expect("subscription registry mutex poisoned")
            .retain(|s| s.id != id);
        self.circuits.remove(id);
    }

    pub fn subscriptions_snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.read().expect("subscription registry mutex poisoned").clone()
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn circuits(&self) -> &CircuitBreakerRegistry {
        &self.circuits
    }

    fn matching_subscriptions(&self, event_type: &str) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .expect("subscription registry mutex poisoned")
            .iter()
            .filter(|s| matcher::matches(&s.pattern, event_type))
            .cloned()
            .collect()
    }

    /// Drives `event` from its current status to a terminal one (§4.5).
    pub async fn dispatch(&self, mut event: Event) -> Result<(), EventBusError> {
        self.metrics.record_observed(&event.event_type);

        let matching = self.matching_subscriptions(&event.event_type);
        let admitted: Vec<Subscription> = matching
            .into_iter()
            .filter(|s| self.circuits.get_or_insert(s.id).may_admit())
            .collect();

        if admitted.is_empty() {
            self.store.update_status(event.id, EventStatus::Done).await?;
            return Ok(());
        }

        self.store.update_status(event.id, EventStatus::Processing).await?;
        event.status = EventStatus::Processing;

        let overrides: Vec<_> = admitted.iter().filter_map(|s| s.retry_override.as_ref()).collect();
        let policy = RetryPolicy::merge(&self.default_retry, overrides);
        let max_attempts = policy.max_attempts();
        let mut errors: Vec<String> = event.last_error.clone().unwrap_or_default();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.sleeper.sleep(policy.delay_for_attempt(attempt)).await;
            }

            let mut failed_at: Option<(usize, String)> = None;
            for (idx, sub) in admitted.iter().enumerate() {
                match run_with_timeout(sub, &event, sub.timeout).await {
                    Ok(()) => continue,
                    Err(err) => {
                        failed_at = Some((idx, err.0));
                        break;
                    }
                }
            }

            match failed_at {
                None => {
                    for sub in &admitted {
                        self.circuits.get_or_insert(sub.id).record(true);
                    }
                    if !errors.is_empty() {
                        // Never shrink retry_count below what the event already
                        // carried in: a recovered event may enter here with
                        // errors.len() less than its persisted retry_count.
                        let retry_count = event.retry_count.max(errors.len() as u32);
                        self.store.update_retry(event.id, retry_count, &errors).await?;
                    }
                    self.store.update_status(event.id, EventStatus::Done).await?;
                    if attempt > 1 {
                        self.metrics.record_retries(&event.event_type, (attempt - 1) as u64);
                        self.metrics.record_success_after_retry(&event.event_type);
                    }
                    return Ok(());
                }
                Some((failed_idx, message)) => {
                    for (idx, sub) in admitted.iter().enumerate() {
                        let circuit = self.circuits.get_or_insert(sub.id);
                        if idx < failed_idx {
                            circuit.record(true);
                        } else if idx == failed_idx {
                            circuit.record(false);
                        } else {
                            circuit.release_unused_admission();
                        }
                    }

                    errors.push(message.clone());
                    self.store.update_retry(event.id, errors.len() as u32, &errors).await?;

                    let next_delay = if attempt < max_attempts {
                        policy.delay_for_attempt(attempt + 1).as_millis() as u64
                    } else {
                        0
                    };
                    self.retry_log
                        .record(RetryLogEntry::new(
                            event.id,
                            event.event_type.clone(),
                            admitted[failed_idx].id,
                            attempt,
                            max_attempts,
                            next_delay,
                            message,
                        ))
                        .await;
                }
            }
        }

        self.store.move_to_dlq(event.id, &errors).await?;
        self.metrics.record_dlq(&event.event_type);
        self.metrics.record_retries(&event.event_type, policy.max_retries as u64);
        Ok(())
    }
}

/// Races a handler invocation against `timeout`. The loser is never
/// cancelled: the spawned task keeps running in the background, an accepted
/// limitation of in-process execution (§4.5b, §9).
async fn run_with_timeout(
    sub: &Subscription,
    event: &Event,
    timeout: Duration,
) -> Result<(), HandlerError> {
    let handler = sub.handler.clone();
    let event = event.clone();
    let join = tokio::spawn(async move { handler.handle(&event).await });

    match tokio::time::timeout(timeout, join).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_error)) => Err(HandlerError::new("handler task panicked")),
        Err(_elapsed) => Err(HandlerError::new(format!("handler timed out after {:?}", timeout))),
    }
}

impl From<StoreError> for EventBusError {
    fn from(err: StoreError) -> Self {
        EventBusError::Store(err)
    }
}
