//! Callback registry and dispatch
//!
//! Registrations are kept in insertion order. Dispatch captures the matching
//! set under the lock and invokes it after the lock is released, so a callback
//! may register or unregister while it runs.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::CallbackError;
use crate::message::Message;

/// Result returned by user callbacks
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type MessageFn = dyn Fn(&Message) -> CallbackResult + Send + Sync;
type TopicMessageFn = dyn Fn(&Message, &str) -> CallbackResult + Send + Sync;

/// A user callback. Cloning shares the same underlying function, which is
/// what [`CallbackRegistry::unregister`] compares.
#[derive(Clone)]
pub enum Callback {
    Message(Arc<MessageFn>),
    WithTopic(Arc<TopicMessageFn>),
}

impl Callback {
    /// Callback receiving only the message
    pub fn message<F>(f: F) -> Self
    where
        F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
    {
        Callback::Message(Arc::new(f))
    }

    /// Callback receiving the message and the topic it arrived on
    pub fn with_topic<F>(f: F) -> Self
    where
        F: Fn(&Message, &str) -> CallbackResult + Send + Sync + 'static,
    {
        Callback::WithTopic(Arc::new(f))
    }

    fn call(&self, message: &Message, topic: &str) -> CallbackResult {
        match self {
            Callback::Message(f) => f(message),
            Callback::WithTopic(f) => f(message, topic),
        }
    }

    /// Same underlying function
    pub fn same_as(&self, other: &Callback) -> bool {
        match (self, other) {
            (Callback::Message(a), Callback::Message(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Callback::WithTopic(a), Callback::WithTopic(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Message(_) => f.write_str("Callback::Message"),
            Callback::WithTopic(_) => f.write_str("Callback::WithTopic"),
        }
    }
}

/// Which messages a registration receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Global,
    ByType(String),
    BySender(String),
    ByReceiver(String),
    ByConversation(String),
    /// Case-insensitive topic equality
    ByTopic(String),
}

impl Selector {
    pub fn matches(&self, message: &Message, topic: &str) -> bool {
        match self {
            Selector::Global => true,
            Selector::ByType(t) => message.message_type() == t,
            Selector::BySender(id) => message.sender_id() == id,
            Selector::ByReceiver(id) => message.receiver_id() == id,
            Selector::ByConversation(id) => message.conversation_id() == id,
            Selector::ByTopic(t) => topic.to_lowercase() == t.to_lowercase(),
        }
    }

    /// Structural equality used by unregister; topics compare case-insensitively
    fn same_as(&self, other: &Selector) -> bool {
        match (self, other) {
            (Selector::ByTopic(a), Selector::ByTopic(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Global => write!(f, "global"),
            Selector::ByType(t) => write!(f, "type={}", t),
            Selector::BySender(id) => write!(f, "sender={}", id),
            Selector::ByReceiver(id) => write!(f, "receiver={}", id),
            Selector::ByConversation(id) => write!(f, "conversation={}", id),
            Selector::ByTopic(t) => write!(f, "topic={}", t),
        }
    }
}

/// Handle returned by [`CallbackRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Debug, Clone)]
struct Registration {
    id: CallbackId,
    selector: Selector,
    callback: Callback,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Registrations that matched and were invoked
    pub matched: usize,
    /// Callbacks that returned an error or panicked
    pub failures: Vec<CallbackError>,
}

/// Ordered set of selector-tagged callbacks
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, selector: Selector, callback: Callback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Registering callback {}", selector);
        self.registrations.lock().push(Registration {
            id,
            selector,
            callback,
        });
        id
    }

    /// Remove registrations with a structurally equal selector and the same
    /// callback. Returns how many were removed; zero is not an error.
    pub fn unregister(&self, selector: &Selector, callback: &Callback) -> usize {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| !(r.selector.same_as(selector) && r.callback.same_as(callback)));
        before - registrations.len()
    }

    pub fn unregister_id(&self, id: CallbackId) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        before != registrations.len()
    }

    /// Invoke every matching callback in registration order.
    ///
    /// Failures are logged and collected; they never stop the dispatch.
    pub fn invoke(&self, message: &Message, topic: &str) -> DispatchReport {
        let matching: Vec<Registration> = {
            let registrations = self.registrations.lock();
            debug!("RegisteredCallbacks={}", registrations.len());
            registrations
                .iter()
                .filter(|r| r.selector.matches(message, topic))
                .cloned()
                .collect()
        };
        trace!(
            "MatchingCallbacks={} for type={} topic={}",
            matching.len(),
            message.message_type(),
            topic
        );

        let mut report = DispatchReport {
            matched: matching.len(),
            failures: Vec::new(),
        };

        for registration in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                registration.callback.call(message, topic)
            }));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(CallbackError::Failed {
                    selector: registration.selector.to_string(),
                    message: e.to_string(),
                }),
                Err(panic) => Some(CallbackError::Panicked {
                    selector: registration.selector.to_string(),
                    message: panic_message(panic.as_ref()),
                }),
            };
            if let Some(failure) = failure {
                error!("Error while running callback: {}", failure);
                report.failures.push(failure);
            }
        }

        report
    }

    pub fn clear(&self) {
        self.registrations.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
