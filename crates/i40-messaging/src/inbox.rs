//! Bounded FIFO buffer of received messages
//!
//! Decouples asynchronous receipt from predicate-based consumption. When the
//! bound is exceeded the oldest entries are dropped silently.
//!
//! Predicates run on a snapshot with no lock held, so they may call back into
//! the inbox.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::message::Message;

/// Entries kept before the oldest are evicted
pub const DEFAULT_INBOX_CAPACITY: usize = 10_000;

/// A received message with the topic it arrived on
#[derive(Debug, Clone)]
pub struct InboxEntry {
    pub message: Arc<Message>,
    pub topic: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    entry: InboxEntry,
}

#[derive(Debug, Default)]
struct Queue {
    slots: VecDeque<Slot>,
    next_seq: u64,
}

impl Queue {
    fn take(&mut self, seq: u64) -> Option<InboxEntry> {
        let index = self.slots.iter().position(|s| s.seq == seq)?;
        self.slots.remove(index).map(|s| s.entry)
    }
}

#[derive(Debug)]
pub struct Inbox {
    queue: Mutex<Queue>,
    capacity: usize,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}

impl Inbox {
    /// Inbox holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(Queue::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, evicting from the front while over capacity
    pub fn enqueue(&self, message: Arc<Message>, topic: impl Into<String>) {
        let entry = InboxEntry {
            message,
            topic: topic.into(),
            received_at: Utc::now(),
        };
        let mut queue = self.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.slots.push_back(Slot { seq, entry });
        while queue.slots.len() > self.capacity {
            if let Some(dropped) = queue.slots.pop_front() {
                trace!(
                    "Inbox full, dropped oldest message type={} conversation={}",
                    dropped.entry.message.message_type(),
                    dropped.entry.message.conversation_id()
                );
            }
        }
    }

    fn snapshot(&self) -> Vec<(u64, InboxEntry)> {
        self.queue
            .lock()
            .slots
            .iter()
            .map(|s| (s.seq, s.entry.clone()))
            .collect()
    }

    /// Remove and return the first entry matching `predicate`.
    /// Non-matching entries keep their positions. If the chosen entry is
    /// taken or evicted before it can be removed, the search starts over.
    pub fn try_dequeue_matching<P>(&self, predicate: P) -> Option<InboxEntry>
    where
        P: Fn(&InboxEntry) -> bool,
    {
        loop {
            let seq = self
                .snapshot()
                .into_iter()
                .find(|(_, entry)| predicate(entry))
                .map(|(seq, _)| seq)?;
            if let Some(entry) = self.queue.lock().take(seq) {
                return Some(entry);
            }
        }
    }

    /// Remove every matching entry in FIFO order; the rest keep their order.
    /// Entries enqueued while the predicate runs stay in the inbox.
    pub fn dequeue_all_matching<P>(&self, predicate: P) -> Vec<InboxEntry>
    where
        P: Fn(&InboxEntry) -> bool,
    {
        let selected: HashSet<u64> = self
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(seq, _)| seq)
            .collect();
        if selected.is_empty() {
            return Vec::new();
        }

        let mut queue = self.queue.lock();
        let (matched, kept): (VecDeque<_>, VecDeque<_>) = queue
            .slots
            .drain(..)
            .partition(|s| selected.contains(&s.seq));
        queue.slots = kept;
        matched.into_iter().map(|s| s.entry).collect()
    }

    /// Copy of the current contents, oldest first
    pub fn peek_snapshot(&self) -> Vec<InboxEntry> {
        self.queue.lock().slots.iter().map(|s| s.entry.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.queue.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().slots.is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MessageBuilder;
    use crate::message_types::{INFORM, PROPOSAL};

    fn message(conversation_id: &str, message_type: &str) -> Arc<Message> {
        Arc::new(
            MessageBuilder::new()
                .from("P24", None)
                .to("RH2", None)
                .message_type(message_type)
                .conversation_id(conversation_id)
                .build()
                .unwrap(),
        )
    }

    fn conversations(entries: &[InboxEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.message.conversation_id().to_string())
            .collect()
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let inbox = Inbox::default();
        for i in 0..=DEFAULT_INBOX_CAPACITY {
            inbox.enqueue(message(&format!("c{}", i), INFORM), "t");
        }

        assert_eq!(inbox.count(), 10_000);
        let all = inbox.dequeue_all_matching(|_| true);
        assert_eq!(all.len(), 10_000);
        assert!(all.iter().all(|e| e.message.conversation_id() != "c0"));
        assert_eq!(all[0].message.conversation_id(), "c1");
        assert_eq!(all[9_999].message.conversation_id(), "c10000");
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_try_dequeue_keeps_order_of_others() {
        let inbox = Inbox::new(10);
        inbox.enqueue(message("a", INFORM), "t");
        inbox.enqueue(message("b", PROPOSAL), "t");
        inbox.enqueue(message("c", INFORM), "t");
        inbox.enqueue(message("d", PROPOSAL), "t");

        let entry = inbox
            .try_dequeue_matching(|e| e.message.message_type() == PROPOSAL)
            .unwrap();
        assert_eq!(entry.message.conversation_id(), "b");
        assert_eq!(conversations(&inbox.peek_snapshot()), vec!["a", "c", "d"]);

        assert!(inbox.try_dequeue_matching(|e| e.topic == "other").is_none());
        assert_eq!(inbox.count(), 3);
    }

    #[test]
    fn test_dequeue_all_matching() {
        let inbox = Inbox::new(10);
        inbox.enqueue(message("a", INFORM), "t1");
        inbox.enqueue(message("b", PROPOSAL), "t2");
        inbox.enqueue(message("c", INFORM), "t1");
        inbox.enqueue(message("d", PROPOSAL), "t2");

        let matched = inbox.dequeue_all_matching(|e| e.topic == "t2");
        assert_eq!(conversations(&matched), vec!["b", "d"]);
        assert_eq!(conversations(&inbox.peek_snapshot()), vec!["a", "c"]);
    }

    #[test]
    fn test_predicate_may_use_the_inbox() {
        let inbox = Inbox::new(10);
        inbox.enqueue(message("a", INFORM), "t1");
        inbox.enqueue(message("b", INFORM), "t2");
        inbox.enqueue(message("c", INFORM), "t1");

        let matched = inbox.dequeue_all_matching(|e| inbox.count() == 3 && e.topic == "t1");
        assert_eq!(conversations(&matched), vec!["a", "c"]);

        // The predicate takes its own pick away first, so the next match wins
        inbox.enqueue(message("d", PROPOSAL), "t2");
        let entry = inbox
            .try_dequeue_matching(|e| {
                if e.message.conversation_id() == "b" {
                    inbox.try_dequeue_matching(|x| x.message.conversation_id() == "b");
                }
                true
            })
            .unwrap();
        assert_eq!(entry.message.conversation_id(), "d");
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_small_capacity() {
        let inbox = Inbox::new(2);
        inbox.enqueue(message("a", INFORM), "t");
        inbox.enqueue(message("b", INFORM), "t");
        inbox.enqueue(message("c", INFORM), "t");
        assert_eq!(conversations(&inbox.peek_snapshot()), vec!["b", "c"]);
    }

    #[test]
    fn test_concurrent_enqueue_and_dequeue() {
        let inbox = Arc::new(Inbox::new(100));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let inbox = inbox.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        inbox.enqueue(message(&format!("p{}-{}", p, i), INFORM), "t");
                    }
                })
            })
            .collect();
        let consumer = {
            let inbox = inbox.clone();
            std::thread::spawn(move || {
                let mut taken = 0;
                for _ in 0..500 {
                    if inbox.try_dequeue_matching(|_| true).is_some() {
                        taken += 1;
                    }
                }
                taken
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let taken = consumer.join().unwrap();

        assert!(inbox.count() <= 100);
        assert!(taken <= 2_000);
    }
}
