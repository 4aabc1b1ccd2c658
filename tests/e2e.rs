//! End-to-end scenarios exercising the public `Bus` façade, black-box.

use async_trait::async_trait;
use eventbus::{
    Bus, BusConfig, DlqReader, Event, EventStatus, Handler, HandlerError, InstantSleeper, ManualClock,
    MemoryStore, RetryOverride, SubscribeOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct AlwaysFails {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for AlwaysFails {
    async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(HandlerError::new(format!("boom-{n}")))
    }
}

fn bus(store: Arc<dyn eventbus::Store>, clock: Arc<ManualClock>) -> Bus {
    Bus::with_clock_and_sleeper(
        store,
        BusConfig { shutdown_drain: Duration::from_secs(1), default_retry: Default::default() },
        clock,
        Arc::new(InstantSleeper),
    )
}

#[tokio::test]
async fn policy_merge_across_two_overlapping_subscriptions_uses_the_most_permissive_budget() {
    let store: Arc<dyn eventbus::Store> = Arc::new(MemoryStore::new());
    let b = bus(store.clone(), Arc::new(ManualClock::new()));

    let calls_a = Arc::new(AtomicUsize::new(0));
    let calls_b = Arc::new(AtomicUsize::new(0));

    b.subscribe(
        Some("order.*".to_string()),
        Arc::new(AlwaysFails { calls: calls_a.clone() }),
        SubscribeOptions::default().with_retry(RetryOverride { max_retries: Some(1), ..Default::default() }),
    )
    .await
    .unwrap();

    b.subscribe(
        Some("order.created".to_string()),
        Arc::new(AlwaysFails { calls: calls_b.clone() }),
        SubscribeOptions::default().with_retry(RetryOverride { max_retries: Some(4), ..Default::default() }),
    )
    .await
    .unwrap();

    let id = b.publish("order.created", serde_json::json!(null), None).await.unwrap();

    // Merged policy is max_retries = max(1, 4) = 4 -> 5 attempts per handler.
    assert_eq!(calls_a.load(Ordering::SeqCst), 5);
    assert_eq!(calls_b.load(Ordering::SeqCst), 5);

    let event = store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Dlq);
}

#[tokio::test]
async fn half_open_admits_exactly_one_concurrent_probe() {
    let store: Arc<dyn eventbus::Store> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new());
    let b = Arc::new(bus(store.clone(), clock.clone()));

    let failing_calls = Arc::new(AtomicUsize::new(0));
    b.subscribe(
        Some("order.created".to_string()),
        Arc::new(AlwaysFails { calls: failing_calls.clone() }),
        SubscribeOptions::default().with_retry(RetryOverride { max_retries: Some(0), ..Default::default() }),
    )
    .await
    .unwrap();

    // Trip the circuit: 4 failing dispatches.
    for _ in 0..4 {
        b.publish("order.created", serde_json::json!(null), None).await.unwrap();
    }
    assert_eq!(failing_calls.load(Ordering::SeqCst), 4);

    // Advance past the recovery pause so the next two dispatches race for
    // the single half-open probe slot.
    clock.advance(30_000);

    let first = {
        let b = b.clone();
        tokio::spawn(async move { b.publish("order.created", serde_json::json!(null), None).await })
    };
    let second = {
        let b = b.clone();
        tokio::spawn(async move { b.publish("order.created", serde_json::json!(null), None).await })
    };

    let (r1, r2) = tokio::join!(first, second);
    r1.unwrap().unwrap();
    r2.unwrap().unwrap();

    // Exactly one of the two concurrent dispatches should have admitted the
    // probe and invoked the handler again; the admission-denied one produces
    // a `done` event with no handler call, so total calls beyond the
    // original 4 is exactly 1.
    assert_eq!(failing_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn dlq_retry_redelivers_through_the_same_bus() {
    struct FlakyUntilRetried {
        should_fail: Arc<std::sync::atomic::AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for FlakyUntilRetried {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(HandlerError::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    let store: Arc<dyn eventbus::Store> = Arc::new(MemoryStore::new());
    let b = bus(store.clone(), Arc::new(ManualClock::new()));

    let should_fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let calls = Arc::new(AtomicUsize::new(0));
    b.subscribe(
        Some("order.created".to_string()),
        Arc::new(FlakyUntilRetried { should_fail: should_fail.clone(), calls: calls.clone() }),
        SubscribeOptions::default().with_retry(RetryOverride { max_retries: Some(0), ..Default::default() }),
    )
    .await
    .unwrap();

    let id = b.publish("order.created", serde_json::json!(null), None).await.unwrap();
    assert_eq!(store.get_event(id).await.unwrap().unwrap().status, EventStatus::Dlq);

    let reader = DlqReader::new(store.clone());
    assert_eq!(reader.count().await.unwrap(), 1);

    should_fail.store(false, Ordering::SeqCst);
    reader.retry(id).await.unwrap();
    assert_eq!(store.get_event(id).await.unwrap().unwrap().status, EventStatus::Pending);

    // A retried event is reset to `pending`; redelivery is driven by the
    // consumer republishing or by a recovery sweep, not by `retry` itself.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
