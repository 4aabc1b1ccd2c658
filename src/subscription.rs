//! A named handler binding: pattern, timeout, and optional retry override.

use crate::handler::Handler;
use crate::retry_policy::RetryOverride;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default per-handler timeout (§6).
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Options accepted by `Bus::subscribe`.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub timeout: Option<Duration>,
    pub retry: Option<RetryOverride>,
}

impl SubscribeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A registered handler binding, keyed by `id` in the bus's in-memory map.
#[derive(Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub pattern: String,
    pub handler: Arc<dyn Handler>,
    pub timeout: Duration,
    pub retry_override: Option<RetryOverride>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// `pattern` absent is treated as `*` (§4.6) by the caller before this
    /// constructor runs.
    pub fn new(pattern: impl Into<String>, handler: Arc<dyn Handler>, options: SubscribeOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            pattern: pattern.into(),
            handler,
            timeout: options.timeout.unwrap_or(DEFAULT_HANDLER_TIMEOUT),
            retry_override: options.retry,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::event::Event;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn defaults_to_thirty_second_timeout_and_no_override() {
        let sub = Subscription::new("order.*", Arc::new(NoopHandler), SubscribeOptions::default());
        assert_eq!(sub.timeout, Duration::from_secs(30));
        assert!(sub.retry_override.is_none());
    }

    #[test]
    fn options_builder_sets_both_fields() {
        let options = SubscribeOptions::default()
            .with_timeout(Duration::from_millis(500))
            .with_retry(RetryOverride { max_retries: Some(1), ..Default::default() });
        let sub = Subscription::new("order.*", Arc::new(NoopHandler), options);
        assert_eq!(sub.timeout, Duration::from_millis(500));
        assert_eq!(sub.retry_override.unwrap().max_retries, Some(1));
    }

    #[test]
    fn each_subscription_gets_a_unique_id() {
        let a = Subscription::new("order.*", Arc::new(NoopHandler), SubscribeOptions::default());
        let b = Subscription::new("order.*", Arc::new(NoopHandler), SubscribeOptions::default());
        assert_ne!(a.id, b.id);
    }
}
