//! Release events on the bus.

use std::sync::Arc;

use changewire_core::ReleaseEvent;

use crate::error::BusError;
use crate::message::Message;
use crate::traits::EventPublisher;

/// Wraps a publisher with the release topic and keying.
#[derive(Clone)]
pub struct ReleasePublisher {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl ReleasePublisher {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Publish keyed by component name; the event id doubles as correlation id.
    pub async fn publish(&self, event: &ReleaseEvent) -> Result<(), BusError> {
        let message = Message::new(self.topic.clone(), event)?
            .with_key(event.key())
            .with_correlation(event.event_id);
        self.publisher.publish(message).await
    }
}
