//! Errors surfaced by the aggregator's public API.
//!
//! Inbound event handling is total and never returns errors; this type
//! covers construction and the synchronous flush/shutdown entry points.

use std::time::Duration;

/// Errors returned by [`TraceAggregator`](crate::TraceAggregator)
/// construction, flush, and shutdown.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The local reporting address could not be determined at startup.
    /// Fatal: without it no endpoint can be constructed.
    #[error("failed to resolve local reporting endpoint: {0}")]
    EndpointResolution(#[source] std::io::Error),

    /// A background thread could not be spawned at startup.
    #[error("failed to spawn background thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The aggregator was already shut down.
    #[error("aggregator already shut down")]
    AlreadyShutdown,

    /// The control channel to the worker is full or closed.
    #[error("aggregator channel is full or closed")]
    ChannelClosed,

    /// A flush or shutdown did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}
