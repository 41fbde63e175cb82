//! Bounded, append-only chat log with batch trimming.

use serde::Serialize;
use std::collections::VecDeque;

use crate::emotes::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Generated,
    Manual,
}

/// One rendered line in the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub id: u64,
    pub username: String,
    /// Color class for the username (`red`, `teal`, ...).
    pub color: String,
    pub segments: Vec<Segment>,
    /// Pre-rendered message body for the page.
    pub html: String,
    pub source: EntrySource,
}

/// Once `len > capacity`, the oldest `trim_batch` entries are dropped in one go.
#[derive(Debug)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
    trim_batch: usize,
}

impl ChatLog {
    pub fn new(capacity: usize, trim_batch: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            trim_batch,
        }
    }

    /// Append at the end. Returns how many of the oldest entries were trimmed.
    pub fn push(&mut self, entry: ChatEntry) -> usize {
        self.entries.push_back(entry);
        if self.entries.len() <= self.capacity {
            return 0;
        }
        let trimmed = self.trim_batch.min(self.entries.len());
        self.entries.drain(..trimmed);
        trimmed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ChatEntry> {
        self.entries.back()
    }

    /// Owned copy of the current contents, oldest first.
    pub fn to_vec(&self) -> Vec<ChatEntry> {
        self.entries.iter().cloned().collect()
    }
}
