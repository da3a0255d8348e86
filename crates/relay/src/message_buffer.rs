//! In-memory message log for the passive renderer.
//!
//! Append-only ring retaining the most recent entries. Single writer (the
//! orchestrator); readers snapshot.

use std::collections::VecDeque;
use std::sync::Mutex;

use relay_protocol::MessageKind;

const MAX_ENTRIES: usize = 1000;

/// One renderable line.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub text: String,
    pub kind: MessageKind,
}

pub struct MessageBuffer {
    entries: Mutex<VecDeque<BufferedMessage>>,
    capacity: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, kind: MessageKind, text: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(BufferedMessage {
            text: text.into(),
            kind,
        });
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<BufferedMessage> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
