//! Event log channel for the apply phase.
//!
//! Every apply unit gets a cloned [`EventSink`] and reports one entry per
//! attempt. The channel is unbounded so a producer never blocks, whatever the
//! consumer is doing; entries sent after the [`EventLog`] is dropped are
//! discarded with a warning.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::{EventLogEntry, Severity};

/// Create a connected sink/log pair.
pub fn event_channel() -> (EventSink, EventLog) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventLog { rx })
}

/// Producer handle. Cheap to clone, one per concurrent apply unit.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EventLogEntry>,
}

impl EventSink {
    pub fn send(&self, entry: EventLogEntry) {
        if let Err(e) = self.tx.send(entry) {
            warn!(entry = %e.0, "event log closed, dropping entry");
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(EventLogEntry::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.send(EventLogEntry::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(EventLogEntry::error(message));
    }
}

/// Consumer side of the event channel.
#[derive(Debug)]
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<EventLogEntry>,
}

impl EventLog {
    /// Take every entry currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<EventLogEntry> {
        let mut entries = Vec::new();
        while let Ok(entry) = self.rx.try_recv() {
            entries.push(entry);
        }
        entries
    }

    /// Wait for every sink to be dropped, then return all entries.
    pub async fn collect(mut self) -> Vec<EventLogEntry> {
        let mut entries = Vec::new();
        while let Some(entry) = self.rx.recv().await {
            entries.push(entry);
        }
        entries
    }
}

/// Emit an event log entry through `tracing` at the matching level.
pub fn trace_entry(set: &str, entry: &EventLogEntry) {
    match entry.severity {
        Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
            error!(set, "{}", entry.message)
        }
        Severity::Warning => warn!(set, "{}", entry.message),
        Severity::Notice | Severity::Info => info!(set, "{}", entry.message),
        Severity::Debug => debug!(set, "{}", entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_many_producers_one_consumer() {
        let (sink, log) = event_channel();
        let mut handles = Vec::new();
        for i in 0..20 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.info(format!("entry {i}"));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        drop(sink);

        let entries = log.collect().await;
        assert_eq!(entries.len(), 20);
        assert!(entries.iter().all(|e| e.severity == Severity::Info));
    }

    #[test]
    fn test_drain_returns_buffered_entries() {
        let (sink, mut log) = event_channel();
        sink.error("boom");
        sink.warning("careful");
        let entries = log.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], EventLogEntry::error("boom"));
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_send_after_log_dropped_does_not_panic() {
        let (sink, log) = event_channel();
        drop(log);
        sink.info("nobody listening");
    }
}
