use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, ZmqMessage};

use crate::error::BusError;
use crate::message::Message;
use crate::traits::EventPublisher;
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher.
///
/// Messages are sent as two-frame ZMQ messages:
/// 1. Topic string (used by SUB sockets for prefix filtering)
/// 2. MessagePack-encoded [`Message`] envelope
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Connect to a broker frontend that forwards to subscribers.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUB socket to broker frontend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Bind the endpoint so subscribers connect directly.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, BusError> {
        transport.ensure_ipc_dir()?;
        transport.remove_stale_socket()?;
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        let topic = message.topic.clone();
        let envelope_bytes = message.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(topic = %topic, key = ?message.key, "published message");
        Ok(())
    }
}

/// Publisher used when no bus is reachable: messages are logged and dropped.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        info!(
            topic = %message.topic,
            key = ?message.key,
            bytes = message.payload.len(),
            "bus unavailable, event dropped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use zeromq::SubSocket;

    use super::*;

    #[test]
    fn test_two_frame_construction() {
        let topic = "changewire.release.published";
        let mut msg = ZmqMessage::from(topic);
        msg.push_back(b"envelope".to_vec().into());

        let frames: Vec<_> = msg.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), topic.as_bytes());
        assert_eq!(frames[1].as_ref(), b"envelope");
    }

    #[tokio::test]
    async fn test_bound_publisher_reaches_subscriber() {
        let transport = Transport::tcp("127.0.0.1", 15810);
        let publisher = ZmqPublisher::bind(&transport).await.unwrap();

        let mut subscriber = SubSocket::new();
        subscriber.connect(&transport.endpoint()).await.unwrap();
        subscriber.subscribe("changewire.").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let msg = Message::new("changewire.release.published", &"1.0.0".to_string())
            .unwrap()
            .with_key("Spring Boot");
        let correlation_id = msg.correlation_id;
        publisher.publish(msg).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
            .await
            .expect("timed out")
            .unwrap();
        let frames: Vec<_> = received.iter().collect();
        assert_eq!(frames[0].as_ref(), b"changewire.release.published");

        let envelope = Message::from_bytes(frames[1].as_ref()).unwrap();
        assert_eq!(envelope.correlation_id, correlation_id);
        assert_eq!(envelope.key.as_deref(), Some("Spring Boot"));
        assert_eq!(envelope.decode::<String>().unwrap(), "1.0.0");
    }
}
