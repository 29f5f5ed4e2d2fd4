//! Bounded in-memory log of the conversation so far.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::capability::AssistantReply;

pub const TRANSCRIPT_MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "you",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub emotion: Option<String>,
    pub timestamp: SystemTime,
}

pub struct TranscriptLog {
    entries: VecDeque<TranscriptEntry>,
    max_entries: usize,
}

impl Default for TranscriptLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::with_capacity(TRANSCRIPT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.push_entry(TranscriptEntry {
            role,
            content: content.into(),
            emotion: None,
            timestamp: SystemTime::now(),
        });
    }

    pub fn push_reply(&mut self, reply: &AssistantReply) {
        self.push_entry(TranscriptEntry {
            role: Role::Assistant,
            content: reply.content.clone(),
            emotion: reply.emotion.clone(),
            timestamp: SystemTime::now(),
        });
    }

    fn push_entry(&mut self, entry: TranscriptEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&TranscriptEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
