//! Log domain types

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of entries kept by a run log
pub const DEFAULT_LOG_RETENTION: usize = 500;

/// A log entry from pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Append-only log with a retention ceiling
///
/// Once the ceiling is reached the oldest entry is dropped for every new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    retention: usize,
    entries: VecDeque<LogEntry>,
    dropped: u64,
}

impl RunLog {
    /// Creates an empty log keeping at most `retention` entries (minimum 1)
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            retention,
            entries: VecDeque::with_capacity(retention.min(1024)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.retention {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Warning, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Error, message));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Number of entries discarded so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_never_exceeds_retention() {
        let mut log = RunLog::new(500);
        for i in 0..600 {
            log.info(format!("entry {}", i));
            assert!(log.len() <= 500);
        }

        assert_eq!(log.len(), 500);
        assert_eq!(log.dropped(), 100);
        assert_eq!(log.entries().next().unwrap().message, "entry 100");
        assert_eq!(log.last().unwrap().message, "entry 599");
    }

    #[test]
    fn test_zero_retention_is_clamped() {
        let mut log = RunLog::new(0);
        log.info("a");
        log.error("b");

        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().level, LogLevel::Error);
    }
}
