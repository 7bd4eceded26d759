//! # Message Log
//!
//! Structured, levelled messages emitted by the swap subsystem.
//!
//! ## Philosophy
//!
//! Messages are explicit and structured, not printf-style. A message that the
//! user must see (a swap write error, a refused swap file) is recorded once in
//! a [`MessageLog`] and mirrored into `tracing` so that a subscriber can pick it
//! up as well. Whether a message is shown, retried or dropped is decided by the
//! owner of the log, never by the component that emitted it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of the component that emitted an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Creates a new unique source ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memfile:{}", self.0)
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Emitting component (if known)
    pub source: Option<SourceId>,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            source: None,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Shorthand for an error entry
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Shorthand for a warning entry
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    /// Sets the source component
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Looks up a field value by key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn fields_display(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)?;
        if !self.fields.is_empty() {
            write!(f, " ({})", self.fields_display())?;
        }
        Ok(())
    }
}

/// In-memory sink for log entries.
///
/// Every recorded entry is also forwarded to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    /// Creates an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry
    pub fn record(&mut self, entry: LogEntry) {
        let source = entry
            .source
            .map(|s| s.to_string())
            .unwrap_or_default();
        let fields = entry.fields_display();
        match entry.level {
            LogLevel::Debug => tracing::debug!(%source, %fields, "{}", entry.message),
            LogLevel::Info => tracing::info!(%source, %fields, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(%source, %fields, "{}", entry.message),
            LogLevel::Error => tracing::error!(%source, %fields, "{}", entry.message),
        }
        self.entries.push(entry);
    }

    /// Returns all recorded entries, oldest first
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries whose message starts with `prefix`
    pub fn count_prefixed(&self, prefix: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.message.starts_with(prefix))
            .count()
    }

    /// Number of entries at or above `level`
    pub fn count_at_least(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level >= level).count()
    }

    /// Removes and returns all recorded entries
    pub fn drain(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }
}
