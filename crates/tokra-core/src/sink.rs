//! Recoverable-error collection.

use std::sync::Mutex;

use crate::constants::LOG_TARGET;

/// Records recoverable errors (data corruption observed on a read path,
/// failed entitlement side effects) without unwinding the operation that
/// observed them. The primary ledger mutation is the source of truth; a
/// sink record is a signal for out-of-band reconciliation, not a failure.
pub trait ErrorSink: Send + Sync {
    fn record(&self, message: &str, code: &str, origin: &str);
}

/// Default sink: emits the record as a tracing error event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn record(&self, message: &str, code: &str, origin: &str) {
        tracing::error!(target: LOG_TARGET, code, origin, "{message}");
    }
}

/// One collected record.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkRecord {
    pub message: String,
    pub code: String,
    pub origin: String,
}

/// Collecting sink, used by tests to assert on corruption reports.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return everything recorded so far.
    pub fn take(&self) -> Vec<SinkRecord> {
        std::mem::take(&mut *self.records.lock().expect("sink poisoned"))
    }

    pub fn codes(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("sink poisoned")
            .iter()
            .map(|r| r.code.clone())
            .collect()
    }
}

impl ErrorSink for MemorySink {
    fn record(&self, message: &str, code: &str, origin: &str) {
        self.records.lock().expect("sink poisoned").push(SinkRecord {
            message: message.to_string(),
            code: code.to_string(),
            origin: origin.to_string(),
        });
    }
}
