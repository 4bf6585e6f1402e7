//! Inbound lifecycle events consumed from instrumentation points.

use crate::model::{BinaryValue, RequestId, Timestamp};
use std::num::NonZeroU64;

/// Client-send annotation label.
pub const CLIENT_SEND: &str = "cs";
/// Client-receive annotation label.
pub const CLIENT_RECV: &str = "cr";
/// Server-receive annotation label, recorded when a request is first
/// observed.
pub const SERVER_RECV: &str = "sr";
/// Server-send annotation label, the default terminal label.
pub const SERVER_SEND: &str = "ss";

/// A partial trace event emitted along an RPC request's lifecycle.
///
/// Events are submitted fire-and-forget and processed in order by a
/// single worker; every handler is total, so a malformed or late event is
/// silently dropped rather than surfaced as an error.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    /// Observation of a request. Subject to the sampling decision; an
    /// admitted request gets a span with a [`SERVER_RECV`] annotation.
    /// Re-observing an already open request id corrects the stored name
    /// and endpoint instead of creating a duplicate.
    Sample {
        /// Ephemeral id of the observed request.
        request_id: RequestId,
        /// Service handling the request; becomes the reporting endpoint.
        service_name: String,
        /// Operation name of the request.
        operation_name: String,
        /// Receipt time in microseconds since the UNIX epoch.
        timestamp: Timestamp,
    },
    /// Appends a timestamped annotation to the open span for
    /// `request_id`. The configured terminal label moves the span to the
    /// send queue.
    Annotate {
        /// Id of the span to annotate.
        request_id: RequestId,
        /// Event time in microseconds since the UNIX epoch.
        timestamp: Timestamp,
        /// Annotation label.
        label: String,
    },
    /// Appends a typed key/value fact to the open span for `request_id`.
    BinaryAnnotate {
        /// Id of the span to annotate.
        request_id: RequestId,
        /// Key identifying the fact.
        key: String,
        /// Typed value.
        value: BinaryValue,
    },
    /// Creates a span for `request_id` as a child of the span open for
    /// `parent_context_id`, inheriting its trace id. Ignored when the
    /// parent context is unknown.
    CreateChildSpan {
        /// Id of the child span to create.
        request_id: RequestId,
        /// Id of the span acting as the parent context.
        parent_context_id: RequestId,
    },
    /// Replaces the sampling rate for subsequent observations. Spans
    /// already open are unaffected.
    SetSampleRate {
        /// New sampling divisor; one of every `rate` observations is
        /// admitted.
        rate: NonZeroU64,
    },
    /// Triggers a flush of the send queue ahead of the periodic schedule.
    Tick,
}
