//! Conversation tracking with completion and inactivity expiry
//!
//! Every message is appended, including a transport echo of a message this
//! process published itself. The tracker does not deduplicate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::message::Message;

/// Inactivity after which a conversation may be swept
pub const DEFAULT_CONVERSATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct Conversation {
    messages: Vec<Arc<Message>>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    timeout: Duration,
    completed: bool,
}

impl Conversation {
    fn new(timeout: Duration, now: DateTime<Utc>) -> Self {
        Self {
            messages: Vec::new(),
            created_at: now,
            last_activity_at: now,
            timeout,
            completed: false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.completed {
            return true;
        }
        // Clock going backwards counts as no inactivity
        let idle = (now - self.last_activity_at).to_std().unwrap_or(Duration::ZERO);
        idle > self.timeout
    }
}

/// Read-only view of one conversation
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub timeout: Duration,
    pub completed: bool,
}

/// Maps conversation ids to their ordered message history
#[derive(Debug)]
pub struct ConversationTracker {
    conversations: Mutex<HashMap<String, Conversation>>,
    default_timeout: Duration,
}

impl Default for ConversationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSATION_TIMEOUT)
    }
}

impl ConversationTracker {
    /// Tracker whose implicitly created conversations use `default_timeout`
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Allocate a new conversation and return its id
    pub fn create(&self, timeout: Option<Duration>) -> String {
        let id = Uuid::new_v4().to_string();
        let conversation = Conversation::new(timeout.unwrap_or(self.default_timeout), Utc::now());
        self.conversations.lock().insert(id.clone(), conversation);
        debug!("Created conversation {}", id);
        id
    }

    /// Append to the message's conversation, creating it if needed
    pub fn add_message(&self, message: Arc<Message>) {
        self.add_message_at(message, Utc::now());
    }

    fn add_message_at(&self, message: Arc<Message>, now: DateTime<Utc>) {
        let default_timeout = self.default_timeout;
        let mut conversations = self.conversations.lock();
        let conversation = conversations
            .entry(message.conversation_id().to_string())
            .or_insert_with(|| Conversation::new(default_timeout, now));
        conversation.messages.push(message);
        conversation.last_activity_at = now;
    }

    /// History in arrival order; empty for unknown ids
    pub fn messages(&self, id: &str) -> Vec<Arc<Message>> {
        self.conversations
            .lock()
            .get(id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn last_message(&self, id: &str) -> Option<Arc<Message>> {
        self.conversations
            .lock()
            .get(id)
            .and_then(|c| c.messages.last().cloned())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.conversations.lock().contains_key(id)
    }

    /// Mark completed; the next sweep removes it. Unknown ids are ignored.
    pub fn complete(&self, id: &str) {
        if let Some(conversation) = self.conversations.lock().get_mut(id) {
            conversation.completed = true;
        }
    }

    pub fn is_completed(&self, id: &str) -> Option<bool> {
        self.conversations.lock().get(id).map(|c| c.completed)
    }

    /// Conversations not yet completed
    pub fn active_count(&self) -> usize {
        self.conversations
            .lock()
            .values()
            .filter(|c| !c.completed)
            .count()
    }

    pub fn summary(&self, id: &str) -> Option<ConversationSummary> {
        self.conversations.lock().get(id).map(|c| ConversationSummary {
            id: id.to_string(),
            message_count: c.messages.len(),
            created_at: c.created_at,
            last_activity_at: c.last_activity_at,
            timeout: c.timeout,
            completed: c.completed,
        })
    }

    /// Remove completed conversations and those idle longer than their
    /// timeout. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    /// Sweep as of `now`
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut conversations = self.conversations.lock();
        let before = conversations.len();
        conversations.retain(|_, c| !c.is_expired(now));
        let removed = before - conversations.len();
        if removed > 0 {
            debug!("Removed {} expired conversations", removed);
        }
        removed
    }
}
