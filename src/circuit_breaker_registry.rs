//! Per-subscription circuit breaker registry.
//!
//! The dispatcher never keeps its own `HashMap` of breakers; it asks the
//! registry for the one belonging to a subscription id, creating it lazily
//! on first use so a freshly added subscription starts `closed`.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct CircuitBreakerRegistry {
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<Uuid, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, CircuitBreakerConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            clock,
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for `subscription_id`, creating it on first use.
    pub fn get_or_insert(&self, subscription_id: Uuid) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry mutex poisoned");
        breakers
            .entry(subscription_id)
            .or_insert_with(|| Arc::new(CircuitBreaker::with_config(self.clock.clone(), self.config)))
            .clone()
    }

    /// Drop the breaker for a subscription that was unsubscribed.
    pub fn remove(&self, subscription_id: Uuid) {
        self.breakers.lock().expect("registry mutex poisoned").remove(&subscription_id);
    }

    /// Snapshot of every known subscription's current state, for diagnostics.
    pub fn snapshot(&self) -> Vec<(Uuid, CircuitState)> {
        self.breakers
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .map(|(id, breaker)| (*id, breaker.state()))
            .collect()
    }
}
