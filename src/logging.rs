use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use log::{Level, LevelFilter, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

const LIVE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    /// The line as shown in the log view: `HH:MM:SS message`
    pub fn line(&self) -> String {
        format!("{} {}", self.timestamp, self.message)
    }
}

/// Append-only, timestamped session log.
///
/// Clones share the same storage. Every entry is mirrored to the `log`
/// facade under the sink's target and published to live subscribers.
#[derive(Clone)]
pub struct LogSink {
    entries: Arc<Mutex<Vec<LogMessage>>>,
    sender: broadcast::Sender<LogMessage>,
    target: &'static str,
}

impl LogSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            sender,
            target: "bleproof",
        }
    }

    /// A view onto the same log that tags facade output with `target`
    pub fn with_target(&self, target: &'static str) -> Self {
        Self {
            entries: self.entries.clone(),
            sender: self.sender.clone(),
            target,
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(Level::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(Level::Warn, format!("WARN: {}", message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(Level::Error, format!("ERROR: {}", message.into()));
    }

    pub fn debug(&self, message: impl Into<String>) {
        // Debug output goes to the facade only
        log::debug!(target: self.target, "{}", message.into());
    }

    fn append(&self, level: Level, message: String) {
        log::log!(target: self.target, level, "{}", message);

        let entry = LogMessage {
            level: level.to_string(),
            message,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };
        self.lock().push(entry.clone());

        // No live subscribers is fine
        let _ = self.sender.send(entry);
    }

    /// Empties the log, leaving a single "log cleared" entry
    pub fn clear(&self) {
        self.lock().clear();
        self.info("log cleared");
    }

    pub fn entries(&self) -> Vec<LogMessage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// True when any entry contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|entry| entry.message.contains(needle))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogMessage>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs env_logger as the facade backend. `RUST_LOG` overrides `level`.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_and_timestamp() {
        let sink = LogSink::new();
        sink.info("status = Scanning");
        sink.warn("characteristic not found");
        sink.error("read failed");

        let entries = sink.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "status = Scanning");
        assert_eq!(entries[1].message, "WARN: characteristic not found");
        assert_eq!(entries[2].level, "ERROR");
        assert_eq!(entries[2].message, "ERROR: read failed");
        // HH:MM:SS
        assert_eq!(entries[0].timestamp.len(), 8);
        assert!(entries[0].line().ends_with(" status = Scanning"));
    }

    #[test]
    fn test_clear_leaves_marker() {
        let sink = LogSink::new();
        sink.info("one");
        sink.info("two");
        sink.clear();
        assert_eq!(sink.len(), 1);
        assert!(sink.contains("log cleared"));
        assert!(!sink.contains("one"));
    }

    #[test]
    fn test_targets_share_storage() {
        let sink = LogSink::new();
        let central = sink.with_target("central");
        central.info("from central");
        assert!(sink.contains("from central"));
    }

    #[tokio::test]
    async fn test_live_subscribers_receive_entries() {
        let sink = LogSink::new();
        let mut rx = sink.subscribe();
        sink.info("hello");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "hello");
    }
}
