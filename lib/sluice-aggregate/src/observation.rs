//! Metric observations.

use std::fmt;

use snafu::Snafu;

/// Observation error.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(context(suffix(false)))]
pub enum ObservationError {
    /// The value did not match the metric kind.
    #[snafu(display("{} observations require a {} value", kind, expected))]
    KindMismatch {
        /// Kind of the observation.
        kind: MetricKind,

        /// Expected value type.
        expected: &'static str,
    },

    /// The sample rate was outside of (0, 1].
    #[snafu(display("sample rate {} is outside of (0, 1]", sample_rate))]
    InvalidSampleRate {
        /// The rejected sample rate.
        sample_rate: f64,
    },
}

/// Metric kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricKind {
    /// A counter, summed over the flush interval.
    Counter,

    /// A gauge, keeping only the last value.
    Gauge,

    /// A histogram, summarized with a quantile sketch.
    Histogram,

    /// A timer, aggregated identically to a histogram.
    Timer,

    /// A set, tracking the number of distinct elements.
    Set,
}

impl MetricKind {
    /// Returns the name of this kind, as used in telemetry tags.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Timer => "timer",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed value.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservationValue {
    /// A numeric sample, used by counters, gauges, histograms, and timers.
    Numeric(f64),

    /// A set element.
    Element(String),
}

/// A single, sampled metric observation.
///
/// Observations are validated on construction: the value must match the kind, and the sample rate must be within
/// (0, 1]. The digest identifies the series the observation belongs to, and is trusted as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    name: String,
    kind: MetricKind,
    tags: Vec<String>,
    value: ObservationValue,
    sample_rate: f64,
    digest: u32,
}

impl Observation {
    /// Creates a new `Observation`.
    ///
    /// # Errors
    ///
    /// If the value does not match the kind, or the sample rate is outside of (0, 1], an error is returned.
    pub fn new<N: Into<String>>(
        name: N, kind: MetricKind, tags: Vec<String>, value: ObservationValue, sample_rate: f64, digest: u32,
    ) -> Result<Self, ObservationError> {
        match (kind, &value) {
            (MetricKind::Set, ObservationValue::Element(_)) => {}
            (MetricKind::Set, ObservationValue::Numeric(_)) => {
                return Err(ObservationError::KindMismatch {
                    kind,
                    expected: "element",
                })
            }
            (_, ObservationValue::Numeric(_)) => {}
            (_, ObservationValue::Element(_)) => {
                return Err(ObservationError::KindMismatch {
                    kind,
                    expected: "numeric",
                })
            }
        }

        if !(sample_rate > 0.0 && sample_rate <= 1.0) {
            return Err(ObservationError::InvalidSampleRate { sample_rate });
        }

        Ok(Self {
            name: name.into(),
            kind,
            tags,
            value,
            sample_rate,
            digest,
        })
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the metric kind.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Returns the tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the observed value.
    pub fn value(&self) -> &ObservationValue {
        &self.value
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Returns the series digest.
    pub fn digest(&self) -> u32 {
        self.digest
    }

    /// Consumes the observation, returning its identity and its value.
    pub(crate) fn into_parts(self) -> (String, Vec<String>, ObservationValue) {
        (self.name, self.tags, self.value)
    }
}
