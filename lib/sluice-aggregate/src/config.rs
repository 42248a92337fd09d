//! Typed configuration for aggregation, flushing, and forwarding.

use std::time::Duration;

use http::Uri;
use serde::Deserialize;
use sluice_sketch::{SketchConfig, SketchError};
use snafu::{ResultExt as _, Snafu};

use crate::aggregator::AggregatorSettings;

const fn default_histogram_counter() -> bool {
    false
}

fn default_percentiles() -> Vec<f64> {
    vec![0.5, 0.75, 0.99]
}

const fn default_sketch_relative_accuracy() -> f64 {
    sluice_sketch::DEFAULT_RELATIVE_ACCURACY
}

const fn default_sketch_bin_limit() -> usize {
    sluice_sketch::DEFAULT_BIN_LIMIT
}

const fn default_set_size() -> usize {
    1000
}

const fn default_set_accuracy() -> f64 {
    0.001
}

const fn default_flush_interval_secs() -> u64 {
    10
}

const fn default_flush_max_per_body() -> usize {
    25_000
}

const fn default_flush_on_shutdown() -> bool {
    false
}

fn default_api_hostname() -> String {
    "https://app.datadoghq.com".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    20
}

/// Configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// A percentile was outside of [0, 1].
    #[snafu(display("percentile {} is outside of [0, 1]", percentile))]
    InvalidPercentile {
        /// The rejected percentile.
        percentile: f64,
    },

    /// Set accuracy was outside of (0, 1).
    #[snafu(display("set accuracy {} is outside of (0, 1)", accuracy))]
    InvalidSetAccuracy {
        /// The rejected accuracy.
        accuracy: f64,
    },

    /// Set size was zero.
    #[snafu(display("set size must be greater than zero"))]
    ZeroSetSize,

    /// Sketch parameters were invalid.
    #[snafu(display("invalid sketch configuration: {}", source))]
    InvalidSketch {
        /// Error source.
        source: SketchError,
    },

    /// Maximum number of records per request body was zero.
    #[snafu(display("flush_max_per_body must be greater than zero"))]
    ZeroMetricLimit,

    /// Flush interval was zero.
    #[snafu(display("flush_interval must be greater than zero"))]
    ZeroFlushInterval,

    /// Hostname was empty.
    #[snafu(display("hostname must not be empty"))]
    EmptyHostname,

    /// API key was empty.
    #[snafu(display("api_key must not be empty"))]
    EmptyApiKey,

    /// Request timeout was zero.
    #[snafu(display("forwarder_timeout must be at least one second"))]
    ZeroRequestTimeout,

    /// Shard count was zero.
    #[snafu(display("number of shards must be greater than zero"))]
    ZeroShards,

    /// Shard queue capacity was zero.
    #[snafu(display("shard queue capacity must be greater than zero"))]
    ZeroQueueCapacity,

    /// The series endpoint could not be built from the configured API hostname.
    #[snafu(display("invalid API endpoint derived from '{}': {}", api_hostname, source))]
    InvalidEndpoint {
        /// Configured API hostname.
        api_hostname: String,

        /// Error source.
        source: http::uri::InvalidUri,
    },
}

/// Aggregation configuration.
///
/// Shared by every shard, and used to construct aggregators lazily as new series are observed.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AggregatorConfiguration {
    /// Percentiles to emit for histograms and timers, each in [0, 1].
    ///
    /// Defaults to `[0.5, 0.75, 0.99]`.
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,

    /// Whether or not to emit a per-second rate of samples for histograms and timers.
    ///
    /// Defaults to `false`.
    #[serde(default = "default_histogram_counter")]
    pub histogram_counter: bool,

    /// Relative accuracy of the quantile sketch backing histograms and timers.
    ///
    /// Defaults to 0.01.
    #[serde(default = "default_sketch_relative_accuracy")]
    pub sketch_relative_accuracy: f64,

    /// Maximum number of bins held by a single histogram or timer.
    ///
    /// Defaults to 4096.
    #[serde(default = "default_sketch_bin_limit")]
    pub sketch_bin_limit: usize,

    /// Expected number of distinct elements per set, used to size its filter.
    ///
    /// Defaults to 1000.
    #[serde(default = "default_set_size")]
    pub set_size: usize,

    /// Target false-positive rate of each set's filter.
    ///
    /// Defaults to 0.001.
    #[serde(default = "default_set_accuracy")]
    pub set_accuracy: f64,
}

impl AggregatorConfiguration {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If any percentile, the set parameters, or the sketch parameters are out of range, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(percentile) = self.percentiles.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(ConfigError::InvalidPercentile {
                percentile: *percentile,
            });
        }

        if !(self.set_accuracy > 0.0 && self.set_accuracy < 1.0) {
            return Err(ConfigError::InvalidSetAccuracy {
                accuracy: self.set_accuracy,
            });
        }

        if self.set_size == 0 {
            return Err(ConfigError::ZeroSetSize);
        }

        self.sketch_config().map(|_| ())
    }

    /// Returns the sketch configuration for histograms and timers.
    ///
    /// # Errors
    ///
    /// If the sketch parameters are out of range, an error is returned.
    pub fn sketch_config(&self) -> Result<SketchConfig, ConfigError> {
        SketchConfig::new(self.sketch_relative_accuracy, self.sketch_bin_limit).context(InvalidSketch)
    }

    /// Validates the configuration and converts it into shard-wide aggregator settings.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn settings(&self) -> Result<AggregatorSettings, ConfigError> {
        self.validate()?;

        Ok(AggregatorSettings {
            percentiles: self.percentiles.clone(),
            histogram_counter: self.histogram_counter,
            sketch: self.sketch_config()?,
            set_size: self.set_size,
            set_accuracy: self.set_accuracy,
        })
    }
}

impl Default for AggregatorConfiguration {
    fn default() -> Self {
        Self {
            percentiles: default_percentiles(),
            histogram_counter: default_histogram_counter(),
            sketch_relative_accuracy: default_sketch_relative_accuracy(),
            sketch_bin_limit: default_sketch_bin_limit(),
            set_size: default_set_size(),
            set_accuracy: default_set_accuracy(),
        }
    }
}

/// Flush configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FlusherConfiguration {
    /// Hostname attached to every flushed record.
    pub hostname: String,

    /// Flush interval, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_flush_interval_secs", rename = "flush_interval")]
    flush_interval_secs: u64,

    /// Maximum number of records sent in a single request body.
    ///
    /// Defaults to 25,000.
    #[serde(default = "default_flush_max_per_body")]
    pub flush_max_per_body: usize,

    /// Whether or not to run a final flush when shutting down.
    ///
    /// Defaults to `false`.
    #[serde(default = "default_flush_on_shutdown")]
    pub flush_on_shutdown: bool,
}

impl FlusherConfiguration {
    /// Creates a new `FlusherConfiguration` for the given hostname, with default settings.
    pub fn from_hostname<H: Into<String>>(hostname: H) -> Self {
        Self {
            hostname: hostname.into(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_max_per_body: default_flush_max_per_body(),
            flush_on_shutdown: default_flush_on_shutdown(),
        }
    }

    /// Sets the flush interval.
    ///
    /// Sub-second precision is discarded.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_secs = interval.as_secs();
        self
    }

    /// Sets the maximum number of records per request body.
    pub fn with_flush_max_per_body(mut self, limit: usize) -> Self {
        self.flush_max_per_body = limit;
        self
    }

    /// Sets whether or not to run a final flush when shutting down.
    pub fn with_flush_on_shutdown(mut self, flush_on_shutdown: bool) -> Self {
        self.flush_on_shutdown = flush_on_shutdown;
        self
    }

    /// Returns the flush interval.
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If the hostname is empty, or the interval or per-body limit is zero, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.is_empty() {
            return Err(ConfigError::EmptyHostname);
        }

        if self.flush_interval_secs == 0 {
            return Err(ConfigError::ZeroFlushInterval);
        }

        if self.flush_max_per_body == 0 {
            return Err(ConfigError::ZeroMetricLimit);
        }

        Ok(())
    }
}

/// Forwarder configuration.
#[derive(Clone, Deserialize, PartialEq)]
pub struct ForwarderConfiguration {
    /// Base URL of the metrics backend.
    ///
    /// Defaults to `https://app.datadoghq.com`.
    #[serde(default = "default_api_hostname")]
    pub api_hostname: String,

    /// API key used to authenticate with the metrics backend.
    pub api_key: String,

    /// Request timeout, in seconds.
    ///
    /// Defaults to 20 seconds.
    #[serde(default = "default_request_timeout_secs", rename = "forwarder_timeout")]
    request_timeout_secs: u64,
}

impl ForwarderConfiguration {
    /// Creates a new `ForwarderConfiguration` for the given backend and API key.
    pub fn new<H: Into<String>, K: Into<String>>(api_hostname: H, api_key: K) -> Self {
        Self {
            api_hostname: api_hostname.into(),
            api_key: api_key.into(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Sets the request timeout.
    ///
    /// Sub-second precision is discarded.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Returns the request timeout.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the URI that series payloads are submitted to.
    ///
    /// # Errors
    ///
    /// If the resulting URI is invalid, an error is returned.
    pub fn series_endpoint(&self) -> Result<Uri, ConfigError> {
        let api_hostname = self.api_hostname.trim_end_matches('/');
        format!("{}/api/v1/series?api_key={}", api_hostname, self.api_key)
            .parse::<Uri>()
            .context(InvalidEndpoint { api_hostname })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If the API key is empty, the request timeout is zero, or the endpoint cannot be built, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }

        self.series_endpoint().map(|_| ())
    }
}

impl std::fmt::Debug for ForwarderConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderConfiguration")
            .field("api_hostname", &self.api_hostname)
            .field("api_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
