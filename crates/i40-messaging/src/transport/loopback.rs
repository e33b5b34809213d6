//! In-process broker for tests and single-process agent setups
//!
//! Every transport created from the same [`LoopbackBroker`] sees the others'
//! publishes. Delivery is synchronous: `publish` returns after every matching
//! handler ran, including the publisher's own when it subscribes to the topic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::{set_connected, MessageHandler, Transport};
use crate::error::TransportError;
use crate::topics::matches_filter;

struct Endpoint {
    id: u64,
    connected: watch::Sender<bool>,
    subscriptions: Mutex<Vec<String>>,
    handler: RwLock<Option<MessageHandler>>,
}

impl Endpoint {
    fn accepts(&self, topic: &str) -> bool {
        *self.connected.borrow()
            && self
                .subscriptions
                .lock()
                .iter()
                .any(|filter| matches_filter(filter, topic))
    }
}

#[derive(Default)]
struct BrokerInner {
    endpoints: Mutex<Vec<Arc<Endpoint>>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<BrokerInner>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// New transport attached to this broker, initially disconnected
    pub fn transport(&self) -> LoopbackTransport {
        let endpoint = Arc::new(Endpoint {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            connected: watch::channel(false).0,
            subscriptions: Mutex::new(Vec::new()),
            handler: RwLock::new(None),
        });
        self.inner.endpoints.lock().push(endpoint.clone());
        LoopbackTransport {
            broker: self.clone(),
            endpoint,
        }
    }

    /// Deliver raw bytes as if some peer had published them.
    /// Returns how many handlers ran.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers: Vec<MessageHandler> = self
            .inner
            .endpoints
            .lock()
            .iter()
            .filter(|e| e.accepts(topic))
            .filter_map(|e| e.handler.read().clone())
            .collect();

        trace!("Delivering {} bytes on {} to {} handlers", payload.len(), topic, handlers.len());
        for handler in &handlers {
            handler(topic, payload);
        }
        handlers.len()
    }

    /// Transports currently attached
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    fn detach(&self, id: u64) {
        self.inner.endpoints.lock().retain(|e| e.id != id);
    }
}

pub struct LoopbackTransport {
    broker: LoopbackBroker,
    endpoint: Arc<Endpoint>,
}

impl LoopbackTransport {
    pub fn broker(&self) -> &LoopbackBroker {
        &self.broker
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        set_connected(&self.endpoint.connected, true);
        debug!("Loopback endpoint {} connected", self.endpoint.id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        set_connected(&self.endpoint.connected, false);
        debug!("Loopback endpoint {} disconnected", self.endpoint.id);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.broker.inject(topic, &payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut subscriptions = self.endpoint.subscriptions.lock();
        if !subscriptions.iter().any(|t| t == topic) {
            subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.endpoint.subscriptions.lock().retain(|t| t != topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.endpoint.connected.borrow()
    }

    fn connection_state(&self) -> watch::Receiver<bool> {
        self.endpoint.connected.subscribe()
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.endpoint.handler.write() = Some(handler);
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.broker.detach(self.endpoint.id);
    }
}
