//! Conversation memory: an append-only log of confirmed interactions,
//! scoped to one dataset-session.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub question: String,
    pub code: String,
    pub result_summary: String,
    /// True when the user explicitly accepted the result; false for
    /// unconfirmed successes.
    pub accepted: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Bounded log with drop-oldest retention. Entries are appended on success
/// or accepted feedback only; failed attempts never reach the log.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    entries: Vec<MemoryEntry>,
    retention: usize,
}

const DEFAULT_RETENTION: usize = 100;

impl ConversationMemory {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn push(&mut self, question: &str, code: &str, result_summary: &str, accepted: bool) {
        self.entries.push(MemoryEntry {
            question: question.to_string(),
            code: code.to_string(),
            result_summary: result_summary.to_string(),
            accepted,
            timestamp: chrono::Utc::now(),
        });
        if self.entries.len() > self.retention {
            let overflow = self.entries.len() - self.retention;
            self.entries.drain(..overflow);
        }
    }

    /// Mark the most recent entry matching `question` as accepted. Returns
    /// false when no entry matches.
    pub fn mark_accepted(&mut self, question: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.question == question)
        {
            Some(entry) => {
                entry.accepted = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&MemoryEntry> {
        self.entries.last()
    }

    /// Prompt window: most recent first, capped at `window`. When the log
    /// overflows the window, accepted entries are kept in preference to
    /// unconfirmed ones.
    pub fn window(&self, window: usize) -> Vec<&MemoryEntry> {
        let mut recent: Vec<&MemoryEntry> = self.entries.iter().rev().collect();
        if recent.len() <= window {
            return recent;
        }

        // Stable partition: accepted entries first, each side still
        // most-recent-first, then truncate.
        let accepted: Vec<&MemoryEntry> = recent.iter().copied().filter(|e| e.accepted).collect();
        let unconfirmed: Vec<&MemoryEntry> =
            recent.iter().copied().filter(|e| !e.accepted).collect();
        recent = accepted;
        recent.extend(unconfirmed);
        recent.truncate(window);
        recent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_most_recent_first() {
        let mut memory = ConversationMemory::new();
        memory.push("q1", "c1", "r1", false);
        memory.push("q2", "c2", "r2", false);

        let window = memory.window(5);
        assert_eq!(window[0].question, "q2");
        assert_eq!(window[1].question, "q1");
    }

    #[test]
    fn accepted_entries_survive_truncation() {
        let mut memory = ConversationMemory::new();
        memory.push("old-accepted", "c", "r", true);
        for i in 0..5 {
            memory.push(&format!("q{i}"), "c", "r", false);
        }

        let window = memory.window(3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].question, "old-accepted");
        assert_eq!(window[1].question, "q4");
    }

    #[test]
    fn retention_drops_oldest() {
        let mut memory = ConversationMemory::new();
        memory.retention = 2;
        memory.push("q1", "c", "r", false);
        memory.push("q2", "c", "r", false);
        memory.push("q3", "c", "r", false);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.window(2)[1].question, "q2");
    }
}
