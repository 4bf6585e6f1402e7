//! In-process span aggregation for Zipkin-style distributed tracing.
//!
//! Instrumentation reports raw lifecycle events keyed by an ephemeral
//! request id: a request was observed, something happened, a child call
//! started, the request finished. The [`TraceAggregator`] assembles these
//! into Zipkin spans on a dedicated worker thread, admits one of every N
//! requests through a counting sampler, expires spans whose terminal
//! annotation never arrives, and periodically flushes finished spans as
//! base64-encoded log entries through a pluggable batch [`Transport`].
//!
//! Delivery is best-effort. Event submission never blocks and never
//! reports failure to the caller; batches refused by the collector are
//! dropped, not retried.
//!
//! # Getting started
//!
//! ```
//! use zipkin_aggregator::{InMemoryTransport, TraceAggregator};
//!
//! # fn main() -> Result<(), zipkin_aggregator::Error> {
//! let transport = InMemoryTransport::new();
//! let aggregator = TraceAggregator::builder(transport.clone())
//!     .with_local_addr("127.0.0.1:8080".parse().unwrap())
//!     .build()?;
//!
//! // A request arrives, does some work, and finishes.
//! aggregator.sample(42, "web", "get /users", 1_710_000_000_000);
//! aggregator.binary_annotate(42, "http.status_code", 200_i32);
//! aggregator.annotate(42, 1_710_000_000_250, "ss");
//!
//! aggregator.force_flush()?;
//! assert_eq!(transport.entries().len(), 1);
//! aggregator.shutdown()?;
//! # Ok(())
//! # }
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

mod aggregator;
pub mod config;
mod encode;
mod error;
pub mod event;
pub mod model;
mod sampler;
mod transport;

pub use aggregator::{TraceAggregator, TraceAggregatorBuilder};
pub use config::{AggregatorConfig, AggregatorConfigBuilder};
pub use encode::{EncodeError, Encoder, JsonEncoder, LogEntry, LOG_CATEGORY};
pub use error::Error;
pub use event::TraceEvent;
pub use transport::{InMemoryTransport, ResultCode, Transport, TransportError};
