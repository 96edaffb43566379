//! Operator-facing activity log
//!
//! Keeps the last entries so a console that connects mid-run can catch up.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::Phase;

/// Entries kept for replay
pub const JOURNAL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Matching level of the `log` facade; success is reported as info
    pub fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Info | LogLevel::Success => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Phase the bot was in
    pub step: Option<Phase>,
}

/// Bounded log of recent entries, oldest first
#[derive(Debug, Clone)]
pub struct Journal {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(JOURNAL_CAPACITY)
    }
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
            step: None,
        }
    }

    #[test]
    fn test_oldest_entries_are_dropped() {
        let mut journal = Journal::new(3);
        for i in 0..5 {
            journal.push(entry(&format!("line {i}")));
        }
        let messages: Vec<&str> = journal.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_default_capacity() {
        let mut journal = Journal::default();
        for _ in 0..150 {
            journal.push(entry("x"));
        }
        assert_eq!(journal.len(), JOURNAL_CAPACITY);
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::Success.as_log_level(), log::Level::Info);
        assert_eq!(LogLevel::Warning.as_log_level(), log::Level::Warn);
        assert_eq!(
            serde_json::to_string(&LogLevel::Warning).unwrap(),
            "\"warning\""
        );
    }
}
