//! Conversion of assembled spans into collector log entries.

use crate::model::Span;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

/// Category string identifying the collector log stream for span entries.
pub const LOG_CATEGORY: &str = "zipkin";

/// One encoded span, ready for a batch transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Collector log stream the entry belongs to.
    pub category: String,
    /// Base64-encoded span serialization, a single line.
    pub message: String,
}

/// Failure to serialize a span into its wire form.
#[derive(thiserror::Error, Debug)]
#[error("failed to serialize span: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Converts an assembled span into the transport's log-entry format.
pub trait Encoder: Send + fmt::Debug {
    /// Encodes one span into a single log entry.
    fn encode(&self, span: &Span) -> Result<LogEntry, EncodeError>;
}

/// Default [`Encoder`]: serializes the span as JSON, base64-encodes the
/// bytes into a single line, and tags the entry with [`LOG_CATEGORY`].
#[derive(Clone, Debug, Default)]
pub struct JsonEncoder {
    _private: (),
}

impl Encoder for JsonEncoder {
    fn encode(&self, span: &Span) -> Result<LogEntry, EncodeError> {
        let bytes = serde_json::to_vec(span)?;
        Ok(LogEntry {
            category: LOG_CATEGORY.to_string(),
            message: STANDARD.encode(bytes),
        })
    }
}
