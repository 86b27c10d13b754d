//! Per-recipient bounded mailboxes and topic broadcast.
//!
//! Each recipient gets a lazily-created `tokio::sync::mpsc` channel with a
//! fixed capacity. Senders never block: a full mailbox drops the message and
//! bumps the recipient's `dropped` counter. Topic fan-out uses
//! `tokio::sync::broadcast` with fire-and-forget semantics (no subscribers
//! means the message is simply lost).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ringleader_state::Message;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

/// Default per-recipient mailbox capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Broadcast ring size per topic.
const TOPIC_CAPACITY: usize = 256;

/// Per-mailbox delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Mailbox {
    tx: mpsc::Sender<Message>,
    // Receivers are exclusive; the Mutex lets `recv` take them by &self.
    rx: Mutex<mpsc::Receiver<Message>>,
    counters: Counters,
}

/// Shared in-process message router.
///
/// Cheap to clone. All clones share the same mailboxes and topics.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    mailboxes: RwLock<HashMap<String, Arc<Mailbox>>>,
    topics: RwLock<HashMap<String, broadcast::Sender<Message>>>,
}

impl ChannelManager {
    /// Create a manager with the default mailbox capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a manager with a custom per-recipient mailbox capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                mailboxes: RwLock::new(HashMap::new()),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn mailbox(&self, recipient: &str) -> Arc<Mailbox> {
        if let Some(mb) = self.inner.mailboxes.read().unwrap().get(recipient) {
            return Arc::clone(mb);
        }
        let mut mailboxes = self.inner.mailboxes.write().unwrap();
        Arc::clone(mailboxes.entry(recipient.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.inner.capacity);
            debug!(%recipient, capacity = self.inner.capacity, "mailbox created");
            Arc::new(Mailbox {
                tx,
                rx: Mutex::new(rx),
                counters: Counters::new(),
            })
        }))
    }

    /// Deliver a message to its recipient's mailbox.
    ///
    /// Never blocks. Returns false (and counts a drop) if the mailbox is full.
    pub fn send(&self, message: Message) -> bool {
        let mailbox = self.mailbox(&message.receiver_id);
        match mailbox.tx.try_send(message) {
            Ok(()) => {
                mailbox.counters.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                mailbox.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    recipient = %msg.receiver_id,
                    message_type = ?msg.payload.message_type(),
                    "mailbox full, message dropped"
                );
                false
            }
            // The receiver half lives as long as the mailbox entry.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Receive the next message for `recipient`, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout.
    pub async fn recv(&self, recipient: &str, timeout: Duration) -> Option<Message> {
        let mailbox = self.mailbox(recipient);
        let mut rx = mailbox.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(message)) => {
                mailbox.counters.received.fetch_add(1, Ordering::Relaxed);
                Some(message)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Delivery counters for a recipient's mailbox.
    pub fn stats(&self, recipient: &str) -> QueueStats {
        self.inner
            .mailboxes
            .read()
            .unwrap()
            .get(recipient)
            .map(|mb| mb.counters.snapshot())
            .unwrap_or_default()
    }

    /// Counters for every mailbox that has been created.
    pub fn all_stats(&self) -> HashMap<String, QueueStats> {
        self.inner
            .mailboxes
            .read()
            .unwrap()
            .iter()
            .map(|(recipient, mb)| (recipient.clone(), mb.counters.snapshot()))
            .collect()
    }

    fn topic(&self, topic: &str) -> broadcast::Sender<Message> {
        if let Some(tx) = self.inner.topics.read().unwrap().get(topic) {
            return tx.clone();
        }
        let mut topics = self.inner.topics.write().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish a message to all current subscribers of a topic.
    ///
    /// Fire-and-forget: with no subscribers the message is dropped silently.
    pub fn publish(&self, topic: &str, message: Message) {
        let _ = self.topic(topic).send(message);
    }

    /// Subscribe to a topic. Only messages published after the call are seen.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Message> {
        self.topic(topic).subscribe()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
