//! In-memory publisher for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use changewire_core::ReleaseEvent;

use crate::error::BusError;
use crate::message::Message;
use crate::traits::EventPublisher;

/// Records every published message; can be switched to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<Message>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Decoded release events, in publish order.
    pub fn events(&self) -> Vec<ReleaseEvent> {
        self.messages()
            .iter()
            .filter_map(|m| m.decode().ok())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Transport("publisher switched off".into()));
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
        Ok(())
    }
}
