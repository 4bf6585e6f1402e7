//! Span lifecycle worker and its public handle.
//!
//! All mutable aggregation state lives on one dedicated worker thread:
//! the span table, the endpoint registry, the expiry schedule, the send
//! queue, and the sampling counter. Handles submit events over a bounded
//! channel and never block; expiry and the periodic flush are driven by
//! the worker's receive deadline, so timers cannot race with submitted
//! events. Flushed batches are handed to a second thread that owns the
//! transport, keeping a slow collector out of the span-processing path.
//!
//! ```ascii
//!   instrumentation --TraceEvent--> [worker thread] --batch--> [uploader] --> Transport
//! ```

use crate::config::AggregatorConfig;
use crate::encode::{Encoder, JsonEncoder, LogEntry};
use crate::error::Error;
use crate::event::{TraceEvent, SERVER_RECV};
use crate::model::{self, Annotation, BinaryAnnotation, BinaryValue, Endpoint, RequestId, Span, Timestamp};
use crate::sampler::CountingSampler;
use crate::transport::{ResultCode, Transport};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Capacity of the channel between the worker and the uploader thread.
const UPLOAD_CHANNEL_CAPACITY: usize = 16;

/// Messages exchanged between handles and the worker thread.
#[derive(Debug)]
enum Message {
    Event(TraceEvent),
    ForceFlush(SyncSender<Result<(), Error>>),
    Shutdown(SyncSender<Result<(), Error>>),
}

/// Messages handed to the uploader thread.
#[derive(Debug)]
enum Upload {
    Batch(Vec<LogEntry>),
    Flush(SyncSender<Result<(), Error>>),
    Shutdown(SyncSender<Result<(), Error>>),
}

/// Builder for [`TraceAggregator`].
#[derive(Debug)]
pub struct TraceAggregatorBuilder {
    transport: Box<dyn Transport>,
    config: AggregatorConfig,
    encoder: Box<dyn Encoder>,
    local_addr: Option<SocketAddr>,
}

impl TraceAggregatorBuilder {
    /// Sets the aggregator configuration.
    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default JSON encoder.
    pub fn with_encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    /// Sets the address reported in span endpoints. When unset, the
    /// local address is resolved at build time; failure to resolve it is
    /// fatal.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Builds the aggregator, spawning its worker and uploader threads.
    pub fn build(self) -> Result<TraceAggregator, Error> {
        TraceAggregator::new(self.transport, self.config, self.encoder, self.local_addr)
    }
}

/// Handle to the span aggregation engine.
///
/// Lifecycle events are submitted fire-and-forget through the [`report`]
/// method or its typed wrappers; the caller never blocks and never
/// observes per-event outcomes. Delivery to the collector is best-effort:
/// batches that fail to send are logged and dropped.
///
/// [`report`]: TraceAggregator::report
#[derive(Debug)]
pub struct TraceAggregator {
    sender: SyncSender<Message>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    uploader: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_events: AtomicUsize,
    flush_timeout: Duration,
    shutdown_timeout: Duration,
}

impl TraceAggregator {
    /// Creates a builder delivering batches through `transport`.
    pub fn builder(transport: impl Transport + 'static) -> TraceAggregatorBuilder {
        TraceAggregatorBuilder {
            transport: Box::new(transport),
            config: AggregatorConfig::default(),
            encoder: Box::new(JsonEncoder::default()),
            local_addr: None,
        }
    }

    fn new(
        transport: Box<dyn Transport>,
        config: AggregatorConfig,
        encoder: Box<dyn Encoder>,
        local_addr: Option<SocketAddr>,
    ) -> Result<Self, Error> {
        let local_addr = match local_addr {
            Some(addr) => addr,
            None => model::local_reporting_addr().map_err(Error::EndpointResolution)?,
        };

        let (upload_sender, upload_receiver) = sync_channel(UPLOAD_CHANNEL_CAPACITY);
        let uploader = thread::Builder::new()
            .name("zipkin-aggregator-uploader".to_string())
            .spawn(move || run_uploader(transport, upload_receiver))
            .map_err(Error::Spawn)?;

        let (sender, receiver) = sync_channel(config.max_queue_size);
        let worker = Worker::new(config, local_addr, encoder, upload_sender);
        let worker = thread::Builder::new()
            .name("zipkin-aggregator-worker".to_string())
            .spawn(move || worker.run(receiver))
            .map_err(Error::Spawn)?;

        Ok(TraceAggregator {
            sender,
            worker: Mutex::new(Some(worker)),
            uploader: Mutex::new(Some(uploader)),
            is_shutdown: AtomicBool::new(false),
            dropped_events: AtomicUsize::new(0),
            flush_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        })
    }

    /// Submits one lifecycle event, fire-and-forget.
    ///
    /// Never blocks. When the event channel is full or the aggregator is
    /// shut down the event is dropped and counted; the first drop is
    /// logged.
    pub fn report(&self, event: TraceEvent) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.note_dropped();
            return;
        }
        if self.sender.try_send(Message::Event(event)).is_err() {
            self.note_dropped();
        }
    }

    /// Reports the observation of a request.
    pub fn sample(
        &self,
        request_id: RequestId,
        service_name: impl Into<String>,
        operation_name: impl Into<String>,
        timestamp: Timestamp,
    ) {
        self.report(TraceEvent::Sample {
            request_id,
            service_name: service_name.into(),
            operation_name: operation_name.into(),
            timestamp,
        });
    }

    /// Appends a timestamped annotation to the span for `request_id`.
    pub fn annotate(&self, request_id: RequestId, timestamp: Timestamp, label: impl Into<String>) {
        self.report(TraceEvent::Annotate {
            request_id,
            timestamp,
            label: label.into(),
        });
    }

    /// Appends a typed key/value fact to the span for `request_id`.
    pub fn binary_annotate(
        &self,
        request_id: RequestId,
        key: impl Into<String>,
        value: impl Into<BinaryValue>,
    ) {
        self.report(TraceEvent::BinaryAnnotate {
            request_id,
            key: key.into(),
            value: value.into(),
        });
    }

    /// Creates a span for `request_id` as a child of the span open for
    /// `parent_context_id`.
    pub fn create_child_span(&self, request_id: RequestId, parent_context_id: RequestId) {
        self.report(TraceEvent::CreateChildSpan {
            request_id,
            parent_context_id,
        });
    }

    /// Replaces the sampling rate for subsequent observations.
    pub fn set_sample_rate(&self, rate: NonZeroU64) {
        self.report(TraceEvent::SetSampleRate { rate });
    }

    /// Number of events dropped because the channel was full or the
    /// aggregator was shut down.
    pub fn dropped_events(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Drains the send queue now and waits until the resulting batch has
    /// been handed to the transport.
    pub fn force_flush(&self) -> Result<(), Error> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(Error::AlreadyShutdown);
        }
        let (sender, receiver) = sync_channel(1);
        self.sender
            .try_send(Message::ForceFlush(sender))
            .map_err(|_| Error::ChannelClosed)?;
        receiver
            .recv_timeout(self.flush_timeout)
            .map_err(|_| Error::Timeout(self.flush_timeout))?
    }

    /// Terminates every open span, issues one final flush, and stops both
    /// background threads.
    ///
    /// Returns [`Error::AlreadyShutdown`] when called a second time.
    pub fn shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(Error::AlreadyShutdown);
        }
        let dropped = self.dropped_events.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "trace events were dropped before shutdown");
        }
        let (sender, receiver) = sync_channel(1);
        self.sender
            .try_send(Message::Shutdown(sender))
            .map_err(|_| Error::ChannelClosed)?;
        let result = receiver
            .recv_timeout(self.shutdown_timeout)
            .map_err(|_| Error::Timeout(self.shutdown_timeout))?;
        if let Ok(mut handle) = self.worker.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut handle) = self.uploader.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        result
    }

    fn note_dropped(&self) {
        if self.dropped_events.fetch_add(1, Ordering::Relaxed) == 0 {
            warn!(
                "trace event dropped: the event channel is full or the aggregator is shut down; \
                 further drops are counted silently"
            );
        }
    }
}

/// Dedicated worker owning all mutable aggregation state.
struct Worker {
    config: AggregatorConfig,
    local_addr: SocketAddr,
    encoder: Box<dyn Encoder>,
    uploads: SyncSender<Upload>,
    sampler: CountingSampler,
    spans: HashMap<RequestId, Span>,
    endpoints: HashMap<RequestId, Endpoint>,
    pending: Vec<Span>,
    expirations: BinaryHeap<Reverse<(Instant, RequestId)>>,
    next_flush: Instant,
    rng: SmallRng,
}

impl Worker {
    fn new(
        config: AggregatorConfig,
        local_addr: SocketAddr,
        encoder: Box<dyn Encoder>,
        uploads: SyncSender<Upload>,
    ) -> Self {
        Worker {
            sampler: CountingSampler::new(config.sample_rate),
            spans: HashMap::new(),
            endpoints: HashMap::new(),
            pending: Vec::new(),
            expirations: BinaryHeap::new(),
            next_flush: Instant::now(),
            rng: SmallRng::from_os_rng(),
            config,
            local_addr,
            encoder,
            uploads,
        }
    }

    fn run(mut self, receiver: Receiver<Message>) {
        loop {
            let now = Instant::now();
            self.expire_due(now);
            if now >= self.next_flush {
                self.flush(false);
                self.next_flush = now + self.config.flush_interval;
            }

            let timeout = self
                .next_deadline()
                .saturating_duration_since(Instant::now());
            match receiver.recv_timeout(timeout) {
                Ok(Message::Event(event)) => self.handle_event(event),
                Ok(Message::ForceFlush(reply)) => {
                    self.flush(true);
                    let _ = self.uploads.send(Upload::Flush(reply));
                }
                Ok(Message::Shutdown(reply)) => {
                    self.terminate_all();
                    self.flush(true);
                    let _ = self.uploads.send(Upload::Shutdown(reply));
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every handle is gone; salvage what is still open.
                    debug!("event channel disconnected; flushing remaining spans");
                    self.terminate_all();
                    self.flush(true);
                    return;
                }
            }
        }
    }

    /// The next instant the worker must wake up at, even if no event
    /// arrives: the earlier of the flush tick and the first span expiry.
    fn next_deadline(&self) -> Instant {
        match self.expirations.peek() {
            Some(Reverse((deadline, _))) if *deadline < self.next_flush => *deadline,
            _ => self.next_flush,
        }
    }

    fn handle_event(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Sample {
                request_id,
                service_name,
                operation_name,
                timestamp,
            } => self.observe(request_id, service_name, operation_name, timestamp),
            TraceEvent::Annotate {
                request_id,
                timestamp,
                label,
            } => self.annotate(request_id, timestamp, label),
            TraceEvent::BinaryAnnotate {
                request_id,
                key,
                value,
            } => self.binary_annotate(request_id, key, value),
            TraceEvent::CreateChildSpan {
                request_id,
                parent_context_id,
            } => self.create_child(request_id, parent_context_id),
            TraceEvent::SetSampleRate { rate } => self.sampler.set_rate(rate),
            TraceEvent::Tick => {
                self.flush(false);
                self.next_flush = Instant::now() + self.config.flush_interval;
            }
        }
    }

    /// Sampling decision plus span creation for admitted requests.
    fn observe(
        &mut self,
        request_id: RequestId,
        service_name: String,
        operation_name: String,
        timestamp: Timestamp,
    ) {
        let admitted = self.sampler.observe();

        if let Some(span) = self.spans.get_mut(&request_id) {
            // A repeated observation never re-admits; it corrects the
            // name and fills in a missing endpoint.
            // TODO: confirm late name corrections still arrive from real
            // instrumentation before removing this path.
            if span.name.as_deref() != Some(operation_name.as_str()) {
                span.name = Some(operation_name);
            }
            self.endpoints
                .entry(request_id)
                .or_insert_with(|| Endpoint::new(service_name, self.local_addr));
            return;
        }

        if !admitted {
            return;
        }

        let endpoint = Endpoint::new(service_name, self.local_addr);
        self.endpoints.insert(request_id, endpoint.clone());
        let mut span = Span::new(
            self.rng.random(),
            request_id,
            None,
            Some(operation_name),
        );
        span.record(Annotation::new(timestamp, SERVER_RECV, endpoint));
        self.spans.insert(request_id, span);
        self.arm_expiry(request_id);
    }

    fn annotate(&mut self, request_id: RequestId, timestamp: Timestamp, label: String) {
        let Some(span) = self.spans.get_mut(&request_id) else {
            debug!(request_id, "annotation for unknown span dropped");
            return;
        };
        let endpoint = self
            .endpoints
            .get(&request_id)
            .cloned()
            .unwrap_or_else(Endpoint::unknown);
        let terminal = label == self.config.terminal_label;
        span.record(Annotation::new(timestamp, label, endpoint));
        if terminal {
            self.terminate(request_id, true);
        }
    }

    fn binary_annotate(&mut self, request_id: RequestId, key: String, value: BinaryValue) {
        let Some(span) = self.spans.get_mut(&request_id) else {
            debug!(request_id, "binary annotation for unknown span dropped");
            return;
        };
        let endpoint = self
            .endpoints
            .get(&request_id)
            .cloned()
            .unwrap_or_else(Endpoint::unknown);
        span.record_binary(BinaryAnnotation::new(key, value, endpoint));
    }

    /// A child span cannot be anchored without a known parent context;
    /// the event is ignored when the parent is not open.
    fn create_child(&mut self, request_id: RequestId, parent_context_id: RequestId) {
        let Some((trace_id, parent_id)) = self
            .spans
            .get(&parent_context_id)
            .map(|parent| (parent.trace_id, parent.id))
        else {
            debug!(
                request_id,
                parent_context_id, "child span for unknown parent context ignored"
            );
            return;
        };
        if self.spans.contains_key(&request_id) {
            return;
        }
        self.spans
            .insert(request_id, Span::new(trace_id, request_id, Some(parent_id), None));
        self.arm_expiry(request_id);
    }

    fn arm_expiry(&mut self, request_id: RequestId) {
        self.expirations
            .push(Reverse((Instant::now() + self.config.span_ttl, request_id)));
    }

    fn expire_due(&mut self, now: Instant) {
        while let Some(Reverse((deadline, request_id))) = self.expirations.peek().copied() {
            if deadline > now {
                break;
            }
            self.expirations.pop();
            // The timer has already fired; nothing left to cancel.
            self.terminate(request_id, false);
        }
    }

    /// Moves a span from the table to the send queue, at most once.
    /// Removal from the table is the synchronization point: both removals
    /// are no-ops for an id that is already gone.
    fn terminate(&mut self, request_id: RequestId, cancel_timer: bool) {
        if cancel_timer {
            self.expirations.retain(|Reverse((_, id))| *id != request_id);
        }
        self.endpoints.remove(&request_id);
        if let Some(span) = self.spans.remove(&request_id) {
            self.pending.push(span);
        }
    }

    fn terminate_all(&mut self) {
        self.expirations.clear();
        self.endpoints.clear();
        self.pending.extend(self.spans.drain().map(|(_, span)| span));
    }

    /// Encodes and clears the send queue, handing the whole batch to the
    /// uploader in one message. Periodic flushes never wait: a batch the
    /// backlogged uploader cannot accept is dropped. Control-initiated
    /// flushes block until the uploader accepts the batch, so the
    /// acknowledgment sent afterwards covers it.
    fn flush(&mut self, blocking: bool) {
        if self.pending.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.pending);
        let mut entries = Vec::with_capacity(spans.len());
        for span in &spans {
            match self.encoder.encode(span) {
                Ok(entry) => entries.push(entry),
                Err(error) => warn!(span_id = span.id, %error, "span could not be encoded; dropped"),
            }
        }
        if entries.is_empty() {
            return;
        }
        let rejected = if blocking {
            self.uploads.send(Upload::Batch(entries)).is_err()
        } else {
            self.uploads.try_send(Upload::Batch(entries)).is_err()
        };
        if rejected {
            warn!(batch_size = spans.len(), "uploader unavailable; batch dropped");
        }
    }
}

/// Uploader loop: one transport call per batch, outcome logged, never
/// retried.
fn run_uploader(mut transport: Box<dyn Transport>, receiver: Receiver<Upload>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Upload::Batch(entries) => {
                let batch_size = entries.len();
                match transport.log(entries) {
                    Ok(ResultCode::Ok) => debug!(batch_size, "batch delivered"),
                    Ok(ResultCode::TryLater) => {
                        warn!(batch_size, "collector busy; batch dropped")
                    }
                    Err(error) => warn!(batch_size, %error, "transport failure; batch dropped"),
                }
            }
            Upload::Flush(reply) => {
                let _ = reply.send(Ok(()));
            }
            Upload::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
                return;
            }
        }
    }
}
