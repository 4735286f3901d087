//! Bounded outbound queue with per-message receipts.
//!
//! Producers push [`OutboundEvent`]s and get a [`Receipt`] that resolves
//! once the line has been written to the connection (positive) or the
//! message was dropped or the connection died (negative). When the queue is
//! full the NEWEST message is dropped: backlogged chatter is stale by the
//! time the rate limiter would get to it, while the queued head may be a
//! handshake or moderation line that must still go out.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::warn;

use tmi_proto::OutboundEvent;

/// Default queue capacity.
pub const QUEUE_CAPACITY: usize = 50;

/// Resolves when the associated message has been written or dropped.
pub struct Receipt {
    rx: oneshot::Receiver<bool>,
}

impl Receipt {
    /// A receipt that is already resolved.
    pub fn resolved(value: bool) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Receipt { rx }
    }

    pub(crate) fn pending() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Receipt { rx })
    }

    /// Wait for the outcome. A dropped sender counts as negative.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// A queued message together with its receipt slip.
pub type QueuedMessage = (OutboundEvent, oneshot::Sender<bool>);

/// Bounded FIFO between message producers and the connection writer.
pub struct SendQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
    capacity: usize,
}

impl SendQueue {
    /// Create a queue with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    /// Create a queue with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        SendQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a message. When the queue is full the message is dropped
    /// and its receipt resolves negative immediately.
    pub fn push(&self, event: OutboundEvent) -> Receipt {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            warn!(capacity = self.capacity, "send queue full, dropping message");
            return Receipt::resolved(false);
        }

        let (slip, receipt) = Receipt::pending();
        queue.push_back((event, slip));
        drop(queue);

        self.notify.notify_one();
        receipt
    }

    /// Dequeue the oldest message, waiting for one to arrive.
    pub async fn pop(&self) -> QueuedMessage {
        loop {
            if let Some(item) = self.inner.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop everything still queued, resolving each receipt negative.
    /// Called when the connection dies.
    pub fn clear(&self) {
        let drained: Vec<QueuedMessage> = self.inner.lock().drain(..).collect();
        for (_, slip) in drained {
            let _ = slip.send(false);
        }
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}
