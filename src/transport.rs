//! Outbound batch transport boundary.

use crate::encode::LogEntry;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collector response to a batch log call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    /// The batch was accepted.
    Ok,
    /// The collector is overloaded and asks the caller to retry later.
    /// This crate never does: the batch is dropped.
    TryLater,
}

/// Failure of an outbound transport call.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The call did not complete in time.
    #[error("transport call timed out after {0:?}")]
    Timeout(Duration),
    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Batch delivery client for encoded log entries.
///
/// One call delivers a whole flushed batch; there is no per-entry
/// acknowledgment. Implementations are driven from a dedicated uploader
/// thread and may block.
pub trait Transport: Send + fmt::Debug {
    /// Delivers one batch of encoded entries.
    fn log(&mut self, batch: Vec<LogEntry>) -> Result<ResultCode, TransportError>;
}

/// An in-memory [`Transport`] that records delivered batches.
///
/// Useful for testing and debugging. Clones share the same storage, so a
/// clone kept by the test observes what the aggregator delivered.
#[derive(Clone, Debug)]
pub struct InMemoryTransport {
    batches: Arc<Mutex<Vec<Vec<LogEntry>>>>,
    response: ResultCode,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Creates a transport that accepts every batch.
    pub fn new() -> Self {
        InMemoryTransport {
            batches: Arc::new(Mutex::new(Vec::new())),
            response: ResultCode::Ok,
        }
    }

    /// Creates a transport answering every call with `response`.
    pub fn with_response(response: ResultCode) -> Self {
        InMemoryTransport {
            batches: Arc::new(Mutex::new(Vec::new())),
            response,
        }
    }

    /// The batches delivered so far, in delivery order.
    pub fn batches(&self) -> Vec<Vec<LogEntry>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    /// All delivered entries, flattened across batches.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.batches().into_iter().flatten().collect()
    }

    /// Clears the recorded batches.
    pub fn reset(&self) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
    }
}

impl Transport for InMemoryTransport {
    fn log(&mut self, batch: Vec<LogEntry>) -> Result<ResultCode, TransportError> {
        self.batches
            .lock()
            .map(|mut batches| batches.push(batch))
            .map_err(|_| TransportError::Other("batch storage lock poisoned".to_string()))?;
        Ok(self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            category: "zipkin".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn records_batches_in_order() {
        let mut transport = InMemoryTransport::new();
        let observer = transport.clone();
        assert_eq!(transport.log(vec![entry("a")]).unwrap(), ResultCode::Ok);
        assert_eq!(
            transport.log(vec![entry("b"), entry("c")]).unwrap(),
            ResultCode::Ok
        );
        assert_eq!(observer.batches().len(), 2);
        assert_eq!(observer.entries().len(), 3);
        observer.reset();
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn configured_response_is_returned() {
        let mut transport = InMemoryTransport::with_response(ResultCode::TryLater);
        assert_eq!(
            transport.log(vec![entry("a")]).unwrap(),
            ResultCode::TryLater
        );
        // The batch is still recorded; dropping it is the caller's policy.
        assert_eq!(transport.entries().len(), 1);
    }
}
