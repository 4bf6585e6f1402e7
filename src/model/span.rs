use super::endpoint::Endpoint;
use serde::{Serialize, Serializer};

/// Ephemeral request identifier used to key in-flight spans.
pub type RequestId = u64;

/// Microseconds since the UNIX epoch, as carried by instrumentation events.
pub type Timestamp = i64;

fn hex_u64<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{id:016x}"))
}

fn hex_u64_opt<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => hex_u64(id, serializer),
        None => serializer.serialize_none(),
    }
}

/// A timestamped, labeled event attached to a span.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Event time in microseconds since the UNIX epoch.
    pub timestamp: Timestamp,
    /// Label, e.g. [`SERVER_RECV`](crate::event::SERVER_RECV).
    pub value: String,
    /// Endpoint that recorded the event.
    pub endpoint: Endpoint,
}

impl Annotation {
    /// Creates an annotation at `timestamp` with the given label.
    pub fn new(timestamp: Timestamp, value: impl Into<String>, endpoint: Endpoint) -> Self {
        Annotation {
            timestamp,
            value: value.into(),
            endpoint,
        }
    }
}

/// Typed value of a [`BinaryAnnotation`], the Zipkin v1 annotation type
/// set.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinaryValue {
    /// Boolean fact.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// 16-bit signed integer.
    I16(i16),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
}

impl From<bool> for BinaryValue {
    fn from(value: bool) -> Self {
        BinaryValue::Bool(value)
    }
}

impl From<Vec<u8>> for BinaryValue {
    fn from(value: Vec<u8>) -> Self {
        BinaryValue::Bytes(value)
    }
}

impl From<i16> for BinaryValue {
    fn from(value: i16) -> Self {
        BinaryValue::I16(value)
    }
}

impl From<i32> for BinaryValue {
    fn from(value: i32) -> Self {
        BinaryValue::I32(value)
    }
}

impl From<i64> for BinaryValue {
    fn from(value: i64) -> Self {
        BinaryValue::I64(value)
    }
}

impl From<f64> for BinaryValue {
    fn from(value: f64) -> Self {
        BinaryValue::Double(value)
    }
}

impl From<String> for BinaryValue {
    fn from(value: String) -> Self {
        BinaryValue::String(value)
    }
}

impl From<&str> for BinaryValue {
    fn from(value: &str) -> Self {
        BinaryValue::String(value.to_string())
    }
}

/// A typed key/value fact attached to a span, not timestamped.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryAnnotation {
    /// Key identifying the fact.
    pub key: String,
    /// Typed value.
    #[serde(flatten)]
    pub value: BinaryValue,
    /// Endpoint that recorded the fact.
    pub endpoint: Endpoint,
}

impl BinaryAnnotation {
    /// Creates a binary annotation for `key`.
    pub fn new(key: impl Into<String>, value: impl Into<BinaryValue>, endpoint: Endpoint) -> Self {
        BinaryAnnotation {
            key: key.into(),
            value: value.into(),
            endpoint,
        }
    }
}

/// A single unit of work observed by the tracer.
///
/// Accumulated in place while the request is open; a terminal annotation
/// or an expiry timeout moves it to the send queue. The trace id is fixed
/// at creation, the name may still be corrected afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Identifier shared by every span of one logical request chain.
    #[serde(serialize_with = "hex_u64")]
    pub trace_id: u64,
    /// Identifier of this span; equals the request id that keyed it.
    #[serde(serialize_with = "hex_u64")]
    pub id: RequestId,
    /// Id of the ancestor span this span was anchored to, if any.
    #[serde(serialize_with = "hex_u64_opt", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RequestId>,
    /// Operation name, when one has been observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Timestamped events, newest first.
    pub annotations: Vec<Annotation>,
    /// Typed key/value facts, newest first.
    pub binary_annotations: Vec<BinaryAnnotation>,
}

impl Span {
    /// Creates a span with no annotations.
    pub fn new(
        trace_id: u64,
        id: RequestId,
        parent_id: Option<RequestId>,
        name: Option<String>,
    ) -> Self {
        Span {
            trace_id,
            id,
            parent_id,
            name,
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
        }
    }

    /// Prepends an annotation; the newest record is kept first.
    pub fn record(&mut self, annotation: Annotation) {
        self.annotations.insert(0, annotation);
    }

    /// Prepends a binary annotation; the newest record is kept first.
    pub fn record_binary(&mut self, annotation: BinaryAnnotation) {
        self.binary_annotations.insert(0, annotation);
    }
}
