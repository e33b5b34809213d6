//! Messaging client: the codec, callback registry, conversation tracker and
//! inbox wired to one transport
//!
//! Inbound payloads flow decode -> tracker -> inbox -> callbacks. A payload
//! that does not decode is logged and dropped without touching any state.
//! Outbound messages are encoded, handed to the transport and then recorded
//! in the tracker. When the transport echoes a client's own publishes back,
//! the tracker holds both copies.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, trace, warn};

use crate::callbacks::{Callback, CallbackId, CallbackRegistry, CallbackResult, Selector};
use crate::codec::MessageCodec;
use crate::conversation::{ConversationTracker, DEFAULT_CONVERSATION_TIMEOUT};
use crate::error::MessagingError;
use crate::inbox::{Inbox, InboxEntry, DEFAULT_INBOX_CAPACITY};
use crate::message::Message;
use crate::topics::DEFAULT_TOPIC;
use crate::transport::{MessageHandler, Transport};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Topic subscribed on connect and used when `publish` gets no topic
    pub default_topic: String,
    pub inbox_capacity: usize,
    /// Inactivity timeout for conversations the client did not create itself
    pub conversation_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_topic: DEFAULT_TOPIC.to_string(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            conversation_timeout: DEFAULT_CONVERSATION_TIMEOUT,
        }
    }
}

impl ClientOptions {
    pub fn with_default_topic(mut self, topic: impl Into<String>) -> Self {
        self.default_topic = topic.into();
        self
    }
}

struct ClientCore {
    codec: MessageCodec,
    callbacks: CallbackRegistry,
    conversations: ConversationTracker,
    inbox: Inbox,
    arrivals: Notify,
}

impl ClientCore {
    fn handle_incoming(&self, topic: &str, payload: &[u8]) {
        let message = match self.codec.decode(payload) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                warn!("Dropping undecodable message on {}: {}", topic, e);
                return;
            }
        };

        debug!(
            "Received {} from {} on {} (conversation {})",
            message.message_type(),
            message.sender_id(),
            topic,
            message.conversation_id()
        );

        self.conversations.add_message(message.clone());
        self.inbox.enqueue(message.clone(), topic);
        self.arrivals.notify_waiters();

        let report = self.callbacks.invoke(&message, topic);
        trace!(
            "Dispatched to {} callbacks, {} failed",
            report.matched,
            report.failures.len()
        );
    }
}

#[derive(Clone)]
pub struct MessagingClient {
    transport: Arc<dyn Transport>,
    core: Arc<ClientCore>,
    options: ClientOptions,
}

impl MessagingClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Build a client and install its inbound handler on `transport`
    pub fn with_options(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let core = Arc::new(ClientCore {
            codec: MessageCodec::new(),
            callbacks: CallbackRegistry::new(),
            conversations: ConversationTracker::new(options.conversation_timeout),
            inbox: Inbox::new(options.inbox_capacity),
            arrivals: Notify::new(),
        });

        let handler_core = core.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            handler_core.handle_incoming(topic, payload)
        });
        transport.set_message_handler(handler);

        Self {
            transport,
            core,
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Connect the transport and subscribe to the default topic
    pub async fn connect(&self) -> Result<(), MessagingError> {
        self.transport.connect().await?;
        self.transport.subscribe(&self.options.default_topic).await?;
        info!("Messaging client connected, listening on {}", self.options.default_topic);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), MessagingError> {
        self.transport.disconnect().await?;
        info!("Messaging client disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Follow connect, disconnect and broker-side drops of the transport
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.transport.connection_state()
    }

    /// Encode and publish to `topic` (default topic when `None`), then record
    /// the message in its conversation. Returns the recorded message.
    pub async fn publish(
        &self,
        message: Message,
        topic: Option<&str>,
    ) -> Result<Arc<Message>, MessagingError> {
        let topic = topic.unwrap_or(&self.options.default_topic);
        let payload = self.core.codec.encode(&message)?;
        self.transport.publish(topic, payload).await?;

        debug!(
            "Published {} to {} on {} (conversation {})",
            message.message_type(),
            message.receiver_id(),
            topic,
            message.conversation_id()
        );

        let message = Arc::new(message);
        self.core.conversations.add_message(message.clone());
        Ok(message)
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), MessagingError> {
        Ok(self.transport.subscribe(topic).await?)
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), MessagingError> {
        Ok(self.transport.unsubscribe(topic).await?)
    }

    pub fn register(&self, selector: Selector, callback: Callback) -> CallbackId {
        self.core.callbacks.register(selector, callback)
    }

    /// Called for every received message
    pub fn on_message<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(Selector::Global, Callback::message(f))
    }

    pub fn on_message_type<F>(&self, message_type: impl Into<String>, f: F) -> CallbackId
    where
        F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(Selector::ByType(message_type.into()), Callback::message(f))
    }

    pub fn on_sender<F>(&self, sender_id: impl Into<String>, f: F) -> CallbackId
    where
        F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(Selector::BySender(sender_id.into()), Callback::message(f))
    }

    pub fn on_receiver<F>(&self, receiver_id: impl Into<String>, f: F) -> CallbackId
    where
        F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(Selector::ByReceiver(receiver_id.into()), Callback::message(f))
    }

    pub fn on_conversation<F>(&self, conversation_id: impl Into<String>, f: F) -> CallbackId
    where
        F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(
            Selector::ByConversation(conversation_id.into()),
            Callback::message(f),
        )
    }

    /// Topic comparison is case-insensitive
    pub fn on_topic<F>(&self, topic: impl Into<String>, f: F) -> CallbackId
    where
        F: Fn(&Message, &str) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(Selector::ByTopic(topic.into()), Callback::with_topic(f))
    }

    pub fn unregister(&self, selector: &Selector, callback: &Callback) -> usize {
        self.core.callbacks.unregister(selector, callback)
    }

    pub fn unregister_id(&self, id: CallbackId) -> bool {
        self.core.callbacks.unregister_id(id)
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.core.callbacks
    }

    pub fn create_conversation(&self, timeout: Option<Duration>) -> String {
        self.core.conversations.create(timeout)
    }

    pub fn conversation_messages(&self, conversation_id: &str) -> Vec<Arc<Message>> {
        self.core.conversations.messages(conversation_id)
    }

    pub fn complete_conversation(&self, conversation_id: &str) {
        self.core.conversations.complete(conversation_id)
    }

    pub fn cleanup_expired_conversations(&self) -> usize {
        self.core.conversations.cleanup_expired()
    }

    pub fn active_conversations(&self) -> usize {
        self.core.conversations.active_count()
    }

    pub fn conversations(&self) -> &ConversationTracker {
        &self.core.conversations
    }

    pub fn inbox(&self) -> &Inbox {
        &self.core.inbox
    }

    /// Take the first inbox entry matching `predicate`, waiting up to
    /// `timeout` for one to arrive. Entries received while waiting are
    /// buffered in the inbox, so none are missed between checks.
    pub async fn wait_for<P>(&self, predicate: P, timeout: Duration) -> Option<InboxEntry>
    where
        P: Fn(&InboxEntry) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut notified = std::pin::pin!(self.core.arrivals.notified());
            notified.as_mut().enable();

            if let Some(entry) = self.core.inbox.try_dequeue_matching(&predicate) {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Wait for a message in `request`'s conversation sent by someone other
    /// than `request`'s sender
    pub async fn wait_for_reply(&self, request: &Message, timeout: Duration) -> Option<InboxEntry> {
        let conversation_id = request.conversation_id().to_string();
        let sender_id = request.sender_id().to_string();
        self.wait_for(
            move |entry| {
                entry.message.conversation_id() == conversation_id
                    && entry.message.sender_id() != sender_id
            },
            timeout,
        )
        .await
    }
}
