//! Device management logging with sensitive data redaction
//!
//! The device management kit fans every lifecycle event out to registered
//! [`LoggerSubscriber`]s. Field values are redacted on insertion:
//! - origin tokens, mnemonics and seeds are hidden entirely
//! - addresses and session ids keep a short prefix and suffix

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub tag: &'static str,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            tag,
            message: message.into(),
            fields: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, tag, message)
    }

    pub fn debug(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, tag, message)
    }

    pub fn warn(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, tag, message)
    }

    pub fn error(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, tag, message)
    }

    /// Add a field (auto-redacts sensitive keys)
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let redacted = redact_if_sensitive(key, &value.to_string());
        self.fields.push((key, redacted));
        self
    }

    /// `[tag] message | k=v ...`
    pub fn format_line(&self) -> String {
        if self.fields.is_empty() {
            return format!("[{}] {}", self.tag, self.message);
        }

        let fields = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        format!("[{}] {} | {}", self.tag, self.message, fields)
    }
}

/// Receiver of device management events
pub trait LoggerSubscriber: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

/// Forwards entries to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl LoggerSubscriber for ConsoleLogger {
    fn log(&self, entry: &LogEntry) {
        let line = entry.format_line();
        match entry.level {
            LogLevel::Debug => tracing::debug!(target: "ledger_connector::dmk", "{}", line),
            LogLevel::Info => tracing::info!(target: "ledger_connector::dmk", "{}", line),
            LogLevel::Warn => tracing::warn!(target: "ledger_connector::dmk", "{}", line),
            LogLevel::Error => tracing::error!(target: "ledger_connector::dmk", "{}", line),
        }
    }
}

/// Buffers timestamped lines so a session can be exported for support
#[derive(Debug, Default)]
pub struct LogsExporterLogger {
    lines: Mutex<Vec<String>>,
}

impl LogsExporterLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn export_logs(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl LoggerSubscriber for LogsExporterLogger {
    fn log(&self, entry: &LogEntry) {
        let line = format!(
            "{} {} {}",
            entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            entry.level,
            entry.format_line()
        );
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }
}

/// Redact a value if the key suggests it's sensitive
fn redact_if_sensitive(key: &str, value: &str) -> String {
    let key_lower = key.to_lowercase();

    let fully_redacted_keys = [
        "token", "mnemonic", "seed", "secret", "private", "password",
    ];
    if fully_redacted_keys.iter().any(|k| key_lower.contains(k)) {
        return redact_value(value);
    }

    let partial_keys = ["address", "session"];
    if partial_keys.iter().any(|k| key_lower.contains(k)) {
        return redact_partial(value);
    }

    value.to_string()
}

fn redact_value(value: &str) -> String {
    if value.is_empty() {
        return "[EMPTY]".to_string();
    }
    if value.len() <= 4 {
        "[REDACTED]".to_string()
    } else {
        format!("[REDACTED:{}chars]", value.len())
    }
}

/// Keep the first and last few characters (`0x` prefix not counted)
fn redact_partial(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "[EMPTY]".to_string();
    }

    let prefix_len = if trimmed.starts_with("0x") { 8 } else { 6 };
    let suffix_len = 4;
    if !trimmed.is_ascii() || trimmed.len() <= prefix_len + suffix_len + 3 {
        return redact_value(trimmed);
    }

    format!(
        "{}...{}",
        &trimmed[..prefix_len],
        &trimmed[trimmed.len() - suffix_len..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_value() {
        assert_eq!(redact_value(""), "[EMPTY]");
        assert_eq!(redact_value("abc"), "[REDACTED]");
        assert_eq!(redact_value("origin-token"), "[REDACTED:12chars]");
    }

    #[test]
    fn test_secrets_fully_hidden() {
        let entry = LogEntry::info("dmk", "configured")
            .field("origin_token", "my-gating-token")
            .field("mnemonic", "test test test test test test test test test test test junk")
            .field("transport", "SIMULATOR");

        assert!(entry.fields[0].1.starts_with("[REDACTED"));
        assert!(entry.fields[1].1.starts_with("[REDACTED"));
        assert_eq!(entry.fields[2].1, "SIMULATOR");
        assert!(!entry.format_line().contains("gating"));
    }

    #[test]
    fn test_addresses_partially_hidden() {
        let entry = LogEntry::info("signer", "address")
            .field("address", "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
            .field("session_id", "4f2c9a8e1b7d6c5a4f3e2d1c0b9a8f7e");

        assert_eq!(entry.fields[0].1, "0xf39Fd6...2266");
        assert_eq!(entry.fields[1].1, "4f2c9a...8f7e");
    }

    #[test]
    fn test_exporter_buffers_lines() {
        let exporter = LogsExporterLogger::new();
        exporter.log(&LogEntry::warn("dmk", "refresher ping failed").field("attempt", 2));
        exporter.log(&LogEntry::info("dmk", "disconnected"));

        let lines = exporter.export_logs();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN [dmk] refresher ping failed | attempt=2"));
        assert!(lines[1].ends_with("INFO [dmk] disconnected"));

        exporter.clear();
        assert!(exporter.export_logs().is_empty());
    }

    #[test]
    fn test_console_logger_accepts_all_levels() {
        let logger = ConsoleLogger;
        for entry in [
            LogEntry::debug("t", "d"),
            LogEntry::info("t", "i"),
            LogEntry::warn("t", "w"),
            LogEntry::error("t", "e"),
        ] {
            logger.log(&entry);
        }
    }
}
