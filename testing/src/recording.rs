//! Event publisher that records instead of delivering.

use prizedraw_core::{DomainEvent, EventPublishError, EventPublisher};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Captures every published event for later assertions.
///
/// Clones share the same buffer. [`fail_with`](Self::fail_with) makes every
/// publish fail, for checking that delivery errors never undo a commit.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
    failure: Arc<Mutex<Option<EventPublishError>>>,
}

#[allow(clippy::unwrap_used)] // Poisoning only follows a panicking test
impl RecordingEventPublisher {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Published events of one type
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type() == event_type)
            .collect()
    }

    /// Make every subsequent publish fail with `error`
    pub fn fail_with(&self, error: EventPublishError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[allow(clippy::unwrap_used)]
impl EventPublisher for RecordingEventPublisher {
    fn publish(
        &self,
        event: DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventPublishError>> + Send + '_>> {
        let failure = self.failure.lock().unwrap().clone();
        if failure.is_none() {
            self.events.lock().unwrap().push(event);
        }
        Box::pin(async move { failure.map_or(Ok(()), Err) })
    }
}
