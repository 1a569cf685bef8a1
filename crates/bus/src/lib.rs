pub mod error;
pub mod message;
pub mod pubsub;
pub mod release;
pub mod topics;
pub mod traits;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::BusError;
pub use message::Message;
pub use pubsub::{LogPublisher, ZmqPublisher};
pub use release::ReleasePublisher;
pub use traits::EventPublisher;
pub use transport::Transport;
