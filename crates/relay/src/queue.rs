//! Pending-message queue.
//!
//! A bounded FIFO of user prompts with an awaitable consumer. The
//! orchestrator is the only consumer; producers are the hub RPC handlers.
//! Consecutive messages pushed under the same mode coalesce into one
//! dequeued batch; a mode change flushes the prior batch.

use std::collections::VecDeque;
use std::sync::Mutex;

use relay_protocol::EnhancedMode;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MAX_QUEUED: usize = 256;
const BATCH_SEPARATOR: &str = "\n\n";

/// A dequeued message, possibly a coalesced batch.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message: String,
    pub mode: EnhancedMode,
    pub isolate: bool,
    pub hash: String,
}

struct Entry {
    message: String,
    mode: EnhancedMode,
    hash: String,
}

struct Inner {
    entries: VecDeque<Entry>,
    closed: bool,
}

pub struct MessageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a prompt under the given mode.
    pub fn push(&self, message: impl Into<String>, mode: EnhancedMode) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return;
        }
        if inner.entries.len() >= MAX_QUEUED {
            warn!(
                component = "queue",
                queued = inner.entries.len(),
                "Queue full, dropping message"
            );
            return;
        }
        let hash = mode.hash();
        inner.entries.push_back(Entry {
            message: message.into(),
            mode,
            hash,
        });
        drop(inner);
        self.notify.notify_one();
    }

    pub fn size(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Discard all pending messages.
    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clear();
    }

    /// Close the queue; pending waiters wake up and get `None`.
    pub fn close(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Wait until at least one message is available and dequeue it,
    /// coalescing consecutive same-mode messages into one batch. Returns
    /// `None` if the signal fires while the queue is idle or the queue is
    /// closed; nothing is consumed in that case.
    pub async fn wait_for_message(&self, cancel: &CancellationToken) -> Option<QueuedMessage> {
        loop {
            if let Some(batch) = self.try_dequeue() {
                return Some(batch);
            }
            if self.is_closed() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    fn try_dequeue(&self) -> Option<QueuedMessage> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let first = inner.entries.pop_front()?;
        let mut parts = vec![first.message];

        // Coalesce while the mode hash stays the same; a mode change stays
        // queued for the next wait.
        while inner
            .entries
            .front()
            .map(|next| next.hash == first.hash)
            .unwrap_or(false)
        {
            if let Some(entry) = inner.entries.pop_front() {
                parts.push(entry.message);
            }
        }

        Some(QueuedMessage {
            message: parts.join(BATCH_SEPARATOR),
            mode: first.mode,
            isolate: false,
            hash: first.hash,
        })
    }
}
