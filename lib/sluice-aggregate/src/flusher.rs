use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use http_body_util::Full;
use tokio::{
    select,
    task::JoinSet,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service};
use tracing::{debug, error, info};

use crate::config::{ConfigError, FlusherConfiguration};
use crate::record::FlushRecord;
use crate::shard::Shard;
use crate::submitter::Submitter;
use crate::telemetry::FlushTelemetry;

/// Outcome of a single flush cycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushSummary {
    /// Number of records produced by all shards.
    pub records: usize,

    /// Number of chunks submitted.
    pub chunks: usize,

    /// Number of chunks that failed to submit.
    pub failed_chunks: usize,

    /// Number of records dropped because their chunk failed.
    pub dropped_records: usize,
}

/// Splits records into the fewest chunks of at most `limit` records each, with sizes as even as possible.
///
/// With `W = ceil(total / limit)` chunks, the first `total % W` chunks hold `ceil(total / W)` records and the rest hold
/// `floor(total / W)`. Every record lands in exactly one chunk, in order.
pub fn partition(mut records: Vec<FlushRecord>, limit: usize) -> Vec<Vec<FlushRecord>> {
    let total = records.len();
    if total == 0 {
        return Vec::new();
    }

    let limit = limit.max(1);
    let workers = total.div_ceil(limit);
    let base = total / workers;
    let larger = total % workers;

    let mut chunks = Vec::with_capacity(workers);
    for i in (0..workers).rev() {
        let size = if i < larger { base + 1 } else { base };
        let chunk = records.split_off(records.len() - size);
        chunks.push(chunk);
    }
    chunks.reverse();
    chunks
}

/// Drives flush cycles across all shards.
///
/// Each cycle flushes every shard, attributes the resulting records to the configured hostname, splits them into
/// chunks bounded by `flush_max_per_body`, and submits all chunks concurrently. A failed chunk is dropped without
/// affecting the others, and nothing is retried.
pub struct Flusher<S> {
    shards: Vec<Shard>,
    submitter: Submitter<S>,
    hostname: String,
    interval: Duration,
    metric_limit: usize,
    flush_on_shutdown: bool,
    telemetry: FlushTelemetry,
}

impl<S, B> Flusher<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    /// Creates a new `Flusher` over the given shards.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or no shards are given, an error is returned.
    pub fn new(shards: Vec<Shard>, submitter: Submitter<S>, config: &FlusherConfiguration) -> Result<Self, ConfigError> {
        config.validate()?;
        if shards.is_empty() {
            return Err(ConfigError::ZeroShards);
        }

        Ok(Self {
            shards,
            submitter,
            hostname: config.hostname.clone(),
            interval: config.flush_interval(),
            metric_limit: config.flush_max_per_body,
            flush_on_shutdown: config.flush_on_shutdown,
            telemetry: FlushTelemetry::new(),
        })
    }

    /// Runs a single flush cycle.
    pub async fn flush(&self) -> FlushSummary {
        let start = Instant::now();

        let mut records = Vec::new();
        for shard in &self.shards {
            records.extend(shard.flush_and_reset(self.interval));
        }

        if records.is_empty() {
            info!("Nothing to flush.");
            self.telemetry.record_noop();
            return FlushSummary::default();
        }

        for record in &mut records {
            record.host.clone_from(&self.hostname);
        }

        let total = records.len();
        let chunks = partition(records, self.metric_limit);
        let chunk_count = chunks.len();
        debug!(records = total, chunks = chunk_count, "Submitting flush chunks.");

        let mut submissions = JoinSet::new();
        for chunk in chunks {
            let submitter = self.submitter.clone();
            submissions.spawn(async move {
                let len = chunk.len();
                (len, submitter.submit(chunk).await)
            });
        }

        // Anything not delivered is dropped, including chunks whose task panicked.
        let mut delivered = 0;
        let mut failed_chunks = 0;
        while let Some(result) = submissions.join_next().await {
            match result {
                Ok((len, Ok(()))) => delivered += len,
                Ok((_, Err(_))) => failed_chunks += 1,
                Err(e) => {
                    error!(error = %e, "Chunk submission task failed to run to completion.");
                    failed_chunks += 1;
                }
            }
        }

        let summary = FlushSummary {
            records: total,
            chunks: chunk_count,
            failed_chunks,
            dropped_records: total - delivered,
        };

        let elapsed = start.elapsed();
        self.telemetry.record_cycle(total, chunk_count, elapsed);
        info!(
            records = summary.records,
            chunks = summary.chunks,
            failed_chunks = summary.failed_chunks,
            dropped_records = summary.dropped_records,
            duration_ms = elapsed.as_millis() as u64,
            "Completed flush."
        );

        summary
    }

    /// Runs flush cycles on the configured interval until `shutdown` is triggered.
    ///
    /// If `flush_on_shutdown` is enabled, one final cycle is run after shutdown is triggered.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately, and there is nothing to flush yet.
        ticker.tick().await;

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        if self.flush_on_shutdown {
            debug!("Running final flush before shutdown.");
            self.flush().await;
        }
    }
}
