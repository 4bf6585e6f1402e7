//! Aggregator configuration.

use crate::event::SERVER_SEND;
use std::env;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

/// Sampling rate override, a positive integer.
pub(crate) const ZIPKIN_AGG_SAMPLE_RATE: &str = "ZIPKIN_AGG_SAMPLE_RATE";
/// Default sampling rate: every observed request is admitted.
pub(crate) const DEFAULT_SAMPLE_RATE: NonZeroU64 = NonZeroU64::MIN;
/// Span time-to-live override, in milliseconds.
pub(crate) const ZIPKIN_AGG_SPAN_TTL: &str = "ZIPKIN_AGG_SPAN_TTL";
/// Default span time-to-live.
pub(crate) const DEFAULT_SPAN_TTL_MILLIS: u64 = 30_000;
/// Flush interval override, in milliseconds.
pub(crate) const ZIPKIN_AGG_FLUSH_INTERVAL: &str = "ZIPKIN_AGG_FLUSH_INTERVAL";
/// Default delay between two consecutive flushes.
pub(crate) const DEFAULT_FLUSH_INTERVAL_MILLIS: u64 = 2_000;
/// Event channel capacity override.
pub(crate) const ZIPKIN_AGG_MAX_QUEUE_SIZE: &str = "ZIPKIN_AGG_MAX_QUEUE_SIZE";
/// Default event channel capacity.
pub(crate) const DEFAULT_MAX_QUEUE_SIZE: usize = 2_048;

/// Aggregator configuration.
/// Use [`AggregatorConfigBuilder`] to configure your own instance.
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// One of every `sample_rate` observed requests gets a span created.
    pub(crate) sample_rate: NonZeroU64,

    /// How long a span may stay open before it is forcibly flushed, so
    /// that a lost terminal annotation cannot leak it. The default is 30
    /// seconds.
    pub(crate) span_ttl: Duration,

    /// The delay between two consecutive drains of the send queue. The
    /// default is 2 seconds, starting immediately.
    pub(crate) flush_interval: Duration,

    /// Capacity of the event channel into the worker. Events submitted
    /// while the channel is full are dropped. The default is 2048.
    pub(crate) max_queue_size: usize,

    /// Annotation label that terminates a span. The default is `ss`.
    pub(crate) terminal_label: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfigBuilder::default().build()
    }
}

/// A builder for [`AggregatorConfig`] instances.
#[derive(Clone, Debug)]
pub struct AggregatorConfigBuilder {
    sample_rate: NonZeroU64,
    span_ttl: Duration,
    flush_interval: Duration,
    max_queue_size: usize,
    terminal_label: String,
}

impl Default for AggregatorConfigBuilder {
    /// Creates a builder initialized with the default values, overridden
    /// by environment variables if set. The supported variables are:
    /// * `ZIPKIN_AGG_SAMPLE_RATE`
    /// * `ZIPKIN_AGG_SPAN_TTL` (milliseconds)
    /// * `ZIPKIN_AGG_FLUSH_INTERVAL` (milliseconds)
    /// * `ZIPKIN_AGG_MAX_QUEUE_SIZE`
    fn default() -> Self {
        AggregatorConfigBuilder {
            sample_rate: DEFAULT_SAMPLE_RATE,
            span_ttl: Duration::from_millis(DEFAULT_SPAN_TTL_MILLIS),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MILLIS),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            terminal_label: SERVER_SEND.to_string(),
        }
        .init_from_env_vars()
    }
}

impl AggregatorConfigBuilder {
    /// Sets the sampling rate: one of every `rate` observed requests is
    /// admitted.
    pub fn with_sample_rate(mut self, rate: NonZeroU64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Sets how long a span may stay open before it is forcibly flushed.
    pub fn with_span_ttl(mut self, ttl: Duration) -> Self {
        self.span_ttl = ttl;
        self
    }

    /// Sets the delay between two consecutive drains of the send queue.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the capacity of the event channel into the worker.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Sets the annotation label that terminates a span.
    pub fn with_terminal_label(mut self, label: impl Into<String>) -> Self {
        self.terminal_label = label.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> AggregatorConfig {
        AggregatorConfig {
            sample_rate: self.sample_rate,
            span_ttl: self.span_ttl,
            flush_interval: self.flush_interval,
            max_queue_size: self.max_queue_size,
            terminal_label: self.terminal_label,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(rate) = env::var(ZIPKIN_AGG_SAMPLE_RATE)
            .ok()
            .and_then(|rate| NonZeroU64::from_str(&rate).ok())
        {
            self.sample_rate = rate;
        }

        if let Some(ttl) = env::var(ZIPKIN_AGG_SPAN_TTL)
            .ok()
            .and_then(|ttl| u64::from_str(&ttl).ok())
        {
            self.span_ttl = Duration::from_millis(ttl);
        }

        if let Some(interval) = env::var(ZIPKIN_AGG_FLUSH_INTERVAL)
            .ok()
            .and_then(|interval| u64::from_str(&interval).ok())
        {
            self.flush_interval = Duration::from_millis(interval);
        }

        if let Some(max_queue_size) = env::var(ZIPKIN_AGG_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let env_vars = vec![
            ZIPKIN_AGG_SAMPLE_RATE,
            ZIPKIN_AGG_SPAN_TTL,
            ZIPKIN_AGG_FLUSH_INTERVAL,
            ZIPKIN_AGG_MAX_QUEUE_SIZE,
        ];

        let config = temp_env::with_vars_unset(env_vars, AggregatorConfig::default);

        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(
            config.span_ttl,
            Duration::from_millis(DEFAULT_SPAN_TTL_MILLIS)
        );
        assert_eq!(
            config.flush_interval,
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MILLIS)
        );
        assert_eq!(config.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert_eq!(config.terminal_label, SERVER_SEND);
    }

    #[test]
    fn test_config_configurable_by_env_vars() {
        let env_vars = vec![
            (ZIPKIN_AGG_SAMPLE_RATE, Some("16")),
            (ZIPKIN_AGG_SPAN_TTL, Some("10000")),
            (ZIPKIN_AGG_FLUSH_INTERVAL, Some("500")),
            (ZIPKIN_AGG_MAX_QUEUE_SIZE, Some("4096")),
        ];

        let config = temp_env::with_vars(env_vars, AggregatorConfig::default);

        assert_eq!(config.sample_rate, NonZeroU64::new(16).unwrap());
        assert_eq!(config.span_ttl, Duration::from_millis(10_000));
        assert_eq!(config.flush_interval, Duration::from_millis(500));
        assert_eq!(config.max_queue_size, 4096);
    }

    #[test]
    fn test_invalid_env_values_fall_back_to_defaults() {
        let env_vars = vec![
            (ZIPKIN_AGG_SAMPLE_RATE, Some("0")),
            (ZIPKIN_AGG_SPAN_TTL, Some("soon")),
        ];

        let config = temp_env::with_vars(env_vars, AggregatorConfig::default);

        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(
            config.span_ttl,
            Duration::from_millis(DEFAULT_SPAN_TTL_MILLIS)
        );
    }

    #[test]
    fn test_config_with_fields() {
        let config = AggregatorConfigBuilder::default()
            .with_sample_rate(NonZeroU64::new(8).unwrap())
            .with_span_ttl(Duration::from_millis(100))
            .with_flush_interval(Duration::from_millis(50))
            .with_max_queue_size(64)
            .with_terminal_label("cr")
            .build();

        assert_eq!(config.sample_rate, NonZeroU64::new(8).unwrap());
        assert_eq!(config.span_ttl, Duration::from_millis(100));
        assert_eq!(config.flush_interval, Duration::from_millis(50));
        assert_eq!(config.max_queue_size, 64);
        assert_eq!(config.terminal_label, "cr");
    }
}
