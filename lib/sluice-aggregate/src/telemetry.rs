use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

use crate::observation::MetricKind;

#[derive(Clone)]
struct MetricKindCounter {
    for_counter: Counter,
    for_gauge: Counter,
    for_histogram: Counter,
    for_timer: Counter,
    for_set: Counter,
}

impl MetricKindCounter {
    fn new(name: &'static str) -> Self {
        Self {
            for_counter: counter!(name, "metric_type" => "counter"),
            for_gauge: counter!(name, "metric_type" => "gauge"),
            for_histogram: counter!(name, "metric_type" => "histogram"),
            for_timer: counter!(name, "metric_type" => "timer"),
            for_set: counter!(name, "metric_type" => "set"),
        }
    }

    fn for_kind(&self, kind: MetricKind) -> &Counter {
        match kind {
            MetricKind::Counter => &self.for_counter,
            MetricKind::Gauge => &self.for_gauge,
            MetricKind::Histogram => &self.for_histogram,
            MetricKind::Timer => &self.for_timer,
            MetricKind::Set => &self.for_set,
        }
    }
}

/// Per-shard telemetry.
#[derive(Clone)]
pub struct ShardTelemetry {
    observations_processed: Counter,
    aggregators_flushed: MetricKindCounter,
    flush_swap_duration: Histogram,
}

impl ShardTelemetry {
    /// Creates a new `ShardTelemetry` for the shard with the given index.
    pub fn new(shard_id: usize) -> Self {
        Self {
            observations_processed: counter!("shard_observations_processed_total", "shard" => shard_id.to_string()),
            aggregators_flushed: MetricKindCounter::new("shard_aggregators_flushed_total"),
            flush_swap_duration: histogram!("shard_flush_swap_duration_seconds"),
        }
    }

    pub fn record_observations_processed(&self, processed: u64) {
        self.observations_processed.increment(processed);
    }

    pub fn record_aggregators_flushed(&self, kind: MetricKind, flushed: usize) {
        self.aggregators_flushed.for_kind(kind).increment(flushed as u64);
    }

    pub fn record_flush_swap_duration(&self, duration: Duration) {
        self.flush_swap_duration.record(duration.as_secs_f64());
    }
}

/// Flush cycle telemetry.
#[derive(Clone)]
pub struct FlushTelemetry {
    records: Gauge,
    chunks: Counter,
    total_duration: Histogram,
    noop: Counter,
}

impl FlushTelemetry {
    /// Creates a new `FlushTelemetry`.
    pub fn new() -> Self {
        Self {
            records: gauge!("flush_records_total"),
            chunks: counter!("flush_chunks_total"),
            total_duration: histogram!("flush_total_duration_seconds"),
            noop: counter!("flush_noop_total"),
        }
    }

    pub fn record_cycle(&self, records: usize, chunks: usize, duration: Duration) {
        self.records.set(records as f64);
        self.chunks.increment(chunks as u64);
        self.total_duration.record(duration.as_secs_f64());
    }

    /// Records a cycle that had nothing to flush.
    pub fn record_noop(&self) {
        self.records.set(0.0);
        self.noop.increment(1);
    }
}

/// Backend submission telemetry.
#[derive(Clone)]
pub struct SubmitTelemetry {
    marshal_duration: Histogram,
    post_duration: Histogram,
    content_length: Histogram,
    errors_json: Counter,
    errors_compress: Counter,
    errors_construct: Counter,
    errors_io: Counter,
}

impl SubmitTelemetry {
    /// Creates a new `SubmitTelemetry`.
    pub fn new() -> Self {
        Self {
            marshal_duration: histogram!("flush_part_duration_seconds", "part" => "marshal"),
            post_duration: histogram!("flush_part_duration_seconds", "part" => "post"),
            content_length: histogram!("flush_content_length_bytes"),
            errors_json: counter!("flush_errors_total", "cause" => "json"),
            errors_compress: counter!("flush_errors_total", "cause" => "compress"),
            errors_construct: counter!("flush_errors_total", "cause" => "construct"),
            errors_io: counter!("flush_errors_total", "cause" => "io"),
        }
    }

    pub fn record_marshal_duration(&self, duration: Duration) {
        self.marshal_duration.record(duration.as_secs_f64());
    }

    pub fn record_post_duration(&self, duration: Duration) {
        self.post_duration.record(duration.as_secs_f64());
    }

    pub fn record_content_length(&self, len: usize) {
        self.content_length.record(len as f64);
    }

    pub fn increment_json_errors(&self, records: usize) {
        self.errors_json.increment(records as u64);
    }

    pub fn increment_compress_errors(&self, records: usize) {
        self.errors_compress.increment(records as u64);
    }

    pub fn increment_construct_errors(&self, records: usize) {
        self.errors_construct.increment(records as u64);
    }

    pub fn increment_io_errors(&self, records: usize) {
        self.errors_io.increment(records as u64);
    }

    /// Increments the error count for a rejected request, tagged by the response status code.
    pub fn increment_status_errors(&self, status: u16, records: usize) {
        counter!("flush_errors_total", "cause" => status.to_string()).increment(records as u64);
    }
}
