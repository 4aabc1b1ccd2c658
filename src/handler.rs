//! The subscriber-supplied callable invoked once per matching event.

use crate::error::HandlerError;
use crate::event::Event;
use async_trait::async_trait;

/// In-process event handler. Not persistable — the durable subscription row
/// (`SubscriptionRecord`) is a traceability back-reference only; the
/// `id -> handler` map in memory is the sole source of invocability.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Adapts a plain async closure into a `Handler`, for the common case of a
/// one-off subscription that doesn't need its own named type.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(&Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_handler_adapts_an_async_closure() {
        let handler = FnHandler(|event: &Event| {
            let event_type = event.event_type.clone();
            async move {
                if event_type == "order.created" {
                    Ok(())
                } else {
                    Err(HandlerError::new("unexpected type"))
                }
            }
        });

        let event = Event::new("order.created", serde_json::json!(null), None);
        assert!(handler.handle(&event).await.is_ok());

        let other = Event::new("order.updated", serde_json::json!(null), None);
        assert!(handler.handle(&other).await.is_err());
    }
}
