use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use ahash::AHashMap;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregator::{Aggregation, Aggregator, AggregatorSettings, FlushContext};
use crate::config::{AggregatorConfiguration, ConfigError};
use crate::observation::{MetricKind, Observation};
use crate::record::{get_unix_timestamp, FlushRecord};
use crate::telemetry::ShardTelemetry;

type AggregationMap = AHashMap<u32, Aggregation>;

#[derive(Default)]
struct ShardState {
    counters: AggregationMap,
    gauges: AggregationMap,
    histograms: AggregationMap,
    sets: AggregationMap,
    timers: AggregationMap,
    processed: u64,
}

impl ShardState {
    fn map_mut(&mut self, kind: MetricKind) -> &mut AggregationMap {
        match kind {
            MetricKind::Counter => &mut self.counters,
            MetricKind::Gauge => &mut self.gauges,
            MetricKind::Histogram => &mut self.histograms,
            MetricKind::Set => &mut self.sets,
            MetricKind::Timer => &mut self.timers,
        }
    }

    fn into_maps(self) -> [(MetricKind, AggregationMap); 5] {
        [
            (MetricKind::Counter, self.counters),
            (MetricKind::Gauge, self.gauges),
            (MetricKind::Histogram, self.histograms),
            (MetricKind::Set, self.sets),
            (MetricKind::Timer, self.timers),
        ]
    }
}

struct Inner {
    id: usize,
    settings: AggregatorSettings,
    state: Mutex<ShardState>,
    telemetry: ShardTelemetry,
}

/// A partition of aggregation state.
///
/// Each shard owns the aggregators for the series routed to it, keyed by kind and digest. Observations are applied
/// with [`ingest`][Self::ingest], normally from the shard's own loop ([`run`][Self::run]), while
/// [`flush_and_reset`][Self::flush_and_reset] is called from the flusher. Both coordinate through a single mutex that is
/// only ever held for one ingest or for swapping the state out, never while aggregators are being flushed.
///
/// `Shard` is cheap to clone: clones share the same state.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<Inner>,
}

impl Shard {
    /// Creates a new, empty `Shard`.
    ///
    /// # Errors
    ///
    /// If the aggregator configuration is invalid, an error is returned.
    pub fn new(id: usize, config: &AggregatorConfiguration) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                settings: config.settings()?,
                state: Mutex::new(ShardState::default()),
                telemetry: ShardTelemetry::new(id),
            }),
        })
    }

    /// Returns the shard's index.
    pub fn id(&self) -> usize {
        self.inner.id
    }

    fn lock_state(&self) -> MutexGuard<'_, ShardState> {
        // Aggregation state stays internally consistent even if a holder panicked, so poisoning is not fatal.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies an observation to the aggregator for its series, creating the aggregator if this is the first
    /// observation of the series since the last flush.
    pub fn ingest(&self, observation: Observation) {
        let kind = observation.kind();
        let digest = observation.digest();
        let sample_rate = observation.sample_rate();

        let mut state = self.lock_state();
        let map = state.map_mut(kind);
        let applied = if let Some(aggregation) = map.get_mut(&digest) {
            aggregation.ingest(observation.value(), sample_rate)
        } else {
            let (name, tags, value) = observation.into_parts();
            let mut aggregation = Aggregation::new(name, tags, Aggregator::new(kind, &self.inner.settings));
            let applied = aggregation.ingest(&value, sample_rate);
            map.insert(digest, aggregation);
            applied
        };

        if applied {
            state.processed += 1;
        } else {
            warn!(
                shard = self.inner.id,
                digest,
                metric_type = kind.as_str(),
                "Discarding observation whose value does not match its aggregator."
            );
        }
    }

    /// Swaps out all aggregation state and flushes it.
    ///
    /// The swap happens under the shard lock and leaves fresh, empty state behind; flushing the swapped-out
    /// aggregators happens after the lock is released, so ingestion is never blocked behind it. Every observation
    /// ingested before the swap is part of the returned records, and every observation after it is part of the next
    /// flush.
    pub fn flush_and_reset(&self, interval: Duration) -> Vec<FlushRecord> {
        let swap_start = Instant::now();
        let state = mem::take(&mut *self.lock_state());

        let telemetry = &self.inner.telemetry;
        telemetry.record_flush_swap_duration(swap_start.elapsed());

        let processed = state.processed;
        telemetry.record_observations_processed(processed);

        let ctx = FlushContext {
            timestamp: get_unix_timestamp(),
            interval,
            settings: &self.inner.settings,
        };

        let mut records = Vec::new();
        for (kind, aggregations) in state.into_maps() {
            telemetry.record_aggregators_flushed(kind, aggregations.len());
            for aggregation in aggregations.into_values() {
                records.extend(aggregation.flush(&ctx));
            }
        }

        debug!(
            shard = self.inner.id,
            processed,
            records = records.len(),
            "Flushed shard."
        );

        records
    }

    /// Runs the shard's ingestion loop until `shutdown` is triggered or the input channel is closed.
    ///
    /// Observations already queued when shutdown is triggered are still applied, so that a final flush includes them.
    pub async fn run(self, mut observations: mpsc::Receiver<Observation>, shutdown: CancellationToken) {
        debug!(shard = self.inner.id, "Shard started.");

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                maybe_observation = observations.recv() => match maybe_observation {
                    Some(observation) => self.ingest(observation),
                    None => break,
                },
            }
        }

        observations.close();
        while let Ok(observation) = observations.try_recv() {
            self.ingest(observation);
        }

        debug!(shard = self.inner.id, "Shard stopped.");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicBool, sync::atomic::Ordering, thread};

    use super::*;
    use crate::observation::ObservationValue;
    use crate::record::SeriesType;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn shard() -> Shard {
        Shard::new(0, &AggregatorConfiguration::default()).unwrap()
    }

    fn counter(name: &str, value: f64, sample_rate: f64, digest: u32) -> Observation {
        Observation::new(
            name,
            MetricKind::Counter,
            vec![],
            ObservationValue::Numeric(value),
            sample_rate,
            digest,
        )
        .unwrap()
    }

    #[test]
    fn sampled_counter() {
        let shard = shard();
        for _ in 0..5 {
            shard.ingest(counter("requests", 1.0, 0.5, 1));
        }

        let records = shard.flush_and_reset(INTERVAL);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "requests");
        assert_eq!(records[0].series_type, SeriesType::Count);
        assert_eq!(records[0].value(), Some(10.0));
        assert_eq!(records[0].interval, Some(10));
    }

    #[test]
    fn flush_resets_state() {
        let shard = shard();
        shard.ingest(counter("requests", 1.0, 1.0, 1));

        assert_eq!(shard.flush_and_reset(INTERVAL).len(), 1);
        assert!(shard.flush_and_reset(INTERVAL).is_empty());
    }

    #[test]
    fn identity_from_first_observation() {
        let shard = shard();
        let first = Observation::new(
            "requests",
            MetricKind::Counter,
            vec!["env:prod".to_string()],
            ObservationValue::Numeric(1.0),
            1.0,
            7,
        )
        .unwrap();
        shard.ingest(first);
        shard.ingest(counter("renamed", 2.0, 1.0, 7));

        let records = shard.flush_and_reset(INTERVAL);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "requests");
        assert_eq!(records[0].tags, vec!["env:prod".to_string()]);
        assert_eq!(records[0].value(), Some(3.0));
    }

    #[test]
    fn kinds_are_independent() {
        let shard = shard();
        shard.ingest(counter("requests", 1.0, 1.0, 1));
        shard.ingest(
            Observation::new(
                "requests",
                MetricKind::Gauge,
                vec![],
                ObservationValue::Numeric(5.0),
                1.0,
                1,
            )
            .unwrap(),
        );
        shard.ingest(
            Observation::new(
                "users",
                MetricKind::Set,
                vec![],
                ObservationValue::Element("alice".to_string()),
                1.0,
                1,
            )
            .unwrap(),
        );

        let mut records = shard.flush_and_reset(INTERVAL);
        records.sort_by(|a, b| a.metric.cmp(&b.metric).then(a.value().partial_cmp(&b.value()).unwrap()));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].series_type, SeriesType::Count);
        assert_eq!(records[1].series_type, SeriesType::Gauge);
        assert_eq!(records[1].value(), Some(5.0));
        assert_eq!(records[2].metric, "users");
        assert_eq!(records[2].value(), Some(1.0));
    }

    #[test]
    fn concurrent_ingest_and_flush_loses_nothing() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 5_000;

        let shard = shard();
        let done = Arc::new(AtomicBool::new(false));

        let writers = (0..WRITERS)
            .map(|i| {
                let shard = shard.clone();
                let digest = u32::try_from(i).unwrap();
                thread::spawn(move || {
                    for _ in 0..PER_WRITER {
                        shard.ingest(counter("requests", 1.0, 1.0, digest));
                    }
                })
            })
            .collect::<Vec<_>>();

        let flusher = {
            let shard = shard.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut total = 0.0;
                while !done.load(Ordering::Acquire) {
                    total += shard
                        .flush_and_reset(INTERVAL)
                        .iter()
                        .filter_map(FlushRecord::value)
                        .sum::<f64>();
                }
                total
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);

        let flushed_concurrently = flusher.join().unwrap();
        let remaining = shard
            .flush_and_reset(INTERVAL)
            .iter()
            .filter_map(FlushRecord::value)
            .sum::<f64>();

        #[allow(clippy::cast_precision_loss)]
        let expected = (WRITERS * PER_WRITER) as f64;
        assert_eq!(flushed_concurrently + remaining, expected);
    }

    #[tokio::test]
    async fn run_drains_queue_on_shutdown() {
        let shard = shard();
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        for _ in 0..3 {
            tx.send(counter("requests", 1.0, 1.0, 1)).await.unwrap();
        }
        shutdown.cancel();

        shard.clone().run(rx, shutdown).await;

        let records = shard.flush_and_reset(INTERVAL);
        assert_eq!(records[0].value(), Some(3.0));
    }

    #[tokio::test]
    async fn run_stops_when_channel_closes() {
        let shard = shard();
        let (tx, rx) = mpsc::channel(16);

        tx.send(counter("requests", 2.0, 1.0, 1)).await.unwrap();
        drop(tx);

        shard.clone().run(rx, CancellationToken::new()).await;

        let records = shard.flush_and_reset(INTERVAL);
        assert_eq!(records[0].value(), Some(2.0));
    }
}
