//! Per-series aggregators.

use std::time::Duration;

use sluice_sketch::SketchConfig;

use crate::observation::{MetricKind, ObservationValue};
use crate::record::FlushRecord;

mod counter;
pub use self::counter::Counter;

mod gauge;
pub use self::gauge::Gauge;

mod histogram;
pub use self::histogram::Histogram;

mod set;
pub use self::set::{BloomFilter, Set};

/// Shard-wide settings used to construct and flush aggregators.
#[derive(Clone, Debug)]
pub struct AggregatorSettings {
    /// Percentiles emitted by histograms and timers.
    pub percentiles: Vec<f64>,

    /// Whether histograms and timers emit a per-second rate of samples.
    pub histogram_counter: bool,

    /// Sketch configuration for histograms and timers.
    pub sketch: SketchConfig,

    /// Expected number of distinct elements per set.
    pub set_size: usize,

    /// Target false-positive rate of each set's filter.
    pub set_accuracy: f64,
}

/// Flush-time context shared by every aggregator flushed in the same pass.
pub struct FlushContext<'a> {
    /// Timestamp attached to every flushed data point.
    pub timestamp: u64,

    /// Flush interval.
    pub interval: Duration,

    /// Shard-wide settings.
    pub settings: &'a AggregatorSettings,
}

impl FlushContext<'_> {
    fn interval_secs(&self) -> u64 {
        self.interval.as_secs()
    }
}

/// An aggregator for a single series.
///
/// Flushing consumes the aggregator, so each one produces output at most once.
#[derive(Clone, Debug)]
pub enum Aggregator {
    /// Counter aggregator.
    Counter(Counter),

    /// Gauge aggregator.
    Gauge(Gauge),

    /// Histogram aggregator, also used for timers.
    Histogram(Histogram),

    /// Set aggregator.
    Set(Set),
}

impl Aggregator {
    /// Creates an empty aggregator for the given metric kind.
    pub fn new(kind: MetricKind, settings: &AggregatorSettings) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Counter::default()),
            MetricKind::Gauge => Self::Gauge(Gauge::default()),
            MetricKind::Histogram | MetricKind::Timer => Self::Histogram(Histogram::new(settings.sketch)),
            MetricKind::Set => Self::Set(Set::new(settings.set_size, settings.set_accuracy)),
        }
    }

    /// Applies a sample to the aggregator.
    ///
    /// Returns `false`, leaving the aggregator untouched, if the value is of the wrong shape for this aggregator.
    #[must_use]
    pub fn ingest(&mut self, value: &ObservationValue, sample_rate: f64) -> bool {
        match (self, value) {
            (Self::Counter(counter), ObservationValue::Numeric(v)) => counter.sample(*v, sample_rate),
            (Self::Gauge(gauge), ObservationValue::Numeric(v)) => gauge.sample(*v),
            (Self::Histogram(histogram), ObservationValue::Numeric(v)) => histogram.sample(*v, sample_rate),
            (Self::Set(set), ObservationValue::Element(element)) => set.sample(element),
            _ => return false,
        }
        true
    }

    /// Consumes the aggregator, producing its flush records.
    pub fn flush(self, name: &str, tags: &[String], ctx: &FlushContext<'_>) -> Vec<FlushRecord> {
        match self {
            Self::Counter(counter) => vec![counter.flush(name, tags, ctx)],
            Self::Gauge(gauge) => vec![gauge.flush(name, tags, ctx)],
            Self::Histogram(histogram) => histogram.flush(name, tags, ctx),
            Self::Set(set) => vec![set.flush(name, tags, ctx)],
        }
    }
}

/// An aggregator along with the identity of the series it aggregates.
///
/// The identity is taken from the first observation of the series.
#[derive(Clone, Debug)]
pub struct Aggregation {
    name: String,
    tags: Vec<String>,
    aggregator: Aggregator,
}

impl Aggregation {
    /// Creates a new `Aggregation`.
    pub fn new(name: String, tags: Vec<String>, aggregator: Aggregator) -> Self {
        Self { name, tags, aggregator }
    }

    /// Applies a sample to the underlying aggregator.
    ///
    /// Returns `false` if the value is of the wrong shape for the aggregator.
    #[must_use]
    pub fn ingest(&mut self, value: &ObservationValue, sample_rate: f64) -> bool {
        self.aggregator.ingest(value, sample_rate)
    }

    /// Consumes the aggregation, producing its flush records.
    pub fn flush(self, ctx: &FlushContext<'_>) -> Vec<FlushRecord> {
        self.aggregator.flush(&self.name, &self.tags, ctx)
    }
}
