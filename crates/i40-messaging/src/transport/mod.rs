//! Transport abstraction for publishing and receiving wire messages
//!
//! The messaging core never talks to the network itself. A transport moves raw
//! bytes and reports each received publish to the single handler registered
//! with [`Transport::set_message_handler`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::TransportError;

pub mod loopback;
pub mod mqtt;

pub use loopback::{LoopbackBroker, LoopbackTransport};
pub use mqtt::{MqttSettings, MqttTransport};

/// Receives `(topic, payload)` for every inbound publish. Runs on the
/// transport's delivery task and must not block.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the broker
    async fn connect(&self) -> Result<(), TransportError>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publish raw bytes to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Drop a topic filter subscription
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Receiver that observes every change of the connected flag, including
    /// drops and reconnects the transport handles on its own
    fn connection_state(&self) -> watch::Receiver<bool>;

    /// Install the inbound handler, replacing any previous one
    fn set_message_handler(&self, handler: MessageHandler);
}

/// Store the connected flag, waking watchers only when it changes
pub(crate) fn set_connected(state: &watch::Sender<bool>, connected: bool) -> bool {
    state.send_if_modified(|current| {
        if *current == connected {
            false
        } else {
            *current = connected;
            true
        }
    })
}
