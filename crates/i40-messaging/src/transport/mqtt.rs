//! MQTT transport on top of rumqttc
//!
//! Publishes and subscriptions use QoS 1, publishes are never retained. A
//! background task drives the rumqttc event loop, forwards incoming publishes
//! to the message handler and restores subscriptions after a reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{set_connected, MessageHandler, Transport};
use crate::error::TransportError;

/// Connection settings for [`MqttTransport`]
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    /// How long `connect` waits for the broker's CONNACK
    pub connect_timeout: Duration,
    /// Capacity of the rumqttc request channel
    pub channel_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("i40-{}", Uuid::new_v4()),
            keep_alive: Duration::from_secs(60),
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 10,
        }
    }
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

type HandlerSlot = Arc<RwLock<Option<MessageHandler>>>;

pub struct MqttTransport {
    settings: MqttSettings,
    client: Mutex<Option<AsyncClient>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    handler: HandlerSlot,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connected: Arc<watch::Sender<bool>>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            settings,
            client: Mutex::new(None),
            event_task: Mutex::new(None),
            handler: Arc::new(RwLock::new(None)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(connected),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    fn connected_client(&self) -> Result<AsyncClient, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client.lock().clone().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.settings.host, self.settings.port, self.settings.client_id
        );

        let (client, eventloop) =
            AsyncClient::new(self.settings.to_options(), self.settings.channel_capacity);
        let mut ready = self.connected.subscribe();

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            self.handler.clone(),
            self.subscriptions.clone(),
            self.connected.clone(),
        ));
        if let Some(previous) = self.event_task.lock().replace(task) {
            previous.abort();
        }
        *self.client.lock() = Some(client);

        let wait = async { ready.wait_for(|connected| *connected).await.map(|_| ()) };
        match tokio::time::timeout(self.settings.connect_timeout, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Connection(
                "connection state channel closed".to_string(),
            )),
            Err(_) => {
                if let Some(task) = self.event_task.lock().take() {
                    task.abort();
                }
                self.client.lock().take();
                Err(TransportError::Timeout(format!(
                    "CONNACK from {}:{}",
                    self.settings.host, self.settings.port
                )))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let client = self.client.lock().take();
        let Some(client) = client else {
            return Ok(());
        };

        let result = client.disconnect().await;
        set_connected(&self.connected, false);

        let task = self.event_task.lock().take();
        if let Some(mut task) = task {
            // Let the event loop flush the DISCONNECT packet
            if tokio::time::timeout(Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        info!("Disconnected from MQTT broker");
        result.map_err(TransportError::from)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.connected_client()?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        debug!("Published to {}", topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let client = self.connected_client()?;
        client.subscribe(topic, QoS::AtLeastOnce).await?;
        {
            let mut subscriptions = self.subscriptions.lock();
            if !subscriptions.iter().any(|t| t == topic) {
                subscriptions.push(topic.to_string());
            }
        }
        info!("Subscribed to {}", topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let client = self.connected_client()?;
        client.unsubscribe(topic).await?;
        self.subscriptions.lock().retain(|t| t != topic);
        info!("Unsubscribed from {}", topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.write() = Some(handler);
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    handler: HandlerSlot,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connected: Arc<watch::Sender<bool>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connection established");
                set_connected(&connected, true);
                let topics = subscriptions.lock().clone();
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!("Failed to restore subscription {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let handler = handler.read().clone();
                match handler {
                    Some(handler) => handler(&p.topic, &p.payload),
                    None => debug!("No handler installed, dropping publish on {}", p.topic),
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the connection");
                set_connected(&connected, false);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                set_connected(&connected, false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                set_connected(&connected, false);
                error!("MQTT error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
