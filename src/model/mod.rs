//! Span data model shared by the aggregation engine and the encoder.

mod endpoint;
mod span;

pub use endpoint::{Endpoint, UNKNOWN_SERVICE};
pub use span::{Annotation, BinaryAnnotation, BinaryValue, RequestId, Span, Timestamp};

pub(crate) use endpoint::local_reporting_addr;
