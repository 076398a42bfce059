//! Event publishers.

use prizedraw_core::{DomainEvent, EventPublishError, EventPublisher};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::broadcast;

/// In-process publisher fanning events out to broadcast subscribers.
///
/// Notification collaborators call [`subscribe`](Self::subscribe) and
/// consume the receiver in a loop. A slow receiver lags and skips old events
/// instead of blocking allocations.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(
        &self,
        event: DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventPublishError>> + Send + '_>> {
        Box::pin(async move {
            let event_type = event.event_type();
            self.sender
                .send(event)
                .map(|receivers| {
                    tracing::trace!(event_type, receivers, "Event broadcast");
                })
                .map_err(|_| EventPublishError::NoSubscribers(event_type))
        })
    }
}

/// Publisher that only logs events. Default when no collaborator is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(
        &self,
        event: DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventPublishError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                event_type = event.event_type(),
                user_id = %event.user_id(),
                "Domain event"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prizedraw_core::{Money, PaymentReference, PurchaseId, UserId};

    fn event() -> DomainEvent {
        DomainEvent::PaymentRequired {
            purchase_id: PurchaseId::new(),
            user_id: UserId::new(),
            payment_reference: PaymentReference::generate(),
            amount: Money::from_pounds(2),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = BroadcastEventPublisher::default();
        let mut rx = publisher.subscribe();
        let sent = event();

        publisher.publish(sent.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_reports_error() {
        let publisher = BroadcastEventPublisher::new(4);
        let err = publisher.publish(event()).await.unwrap_err();
        assert_eq!(err, EventPublishError::NoSubscribers("payment_required"));
    }
}
