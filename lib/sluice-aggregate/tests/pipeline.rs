use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_compression::tokio::bufread::ZlibDecoder;
use bytes::Bytes;
use float_cmp::ApproxEqRatio as _;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt as _, Full};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::Value;
use sluice_aggregate::{
    spawn_shards, AggregatorConfiguration, FlushSummary, Flusher, FlusherConfiguration, ForwarderConfiguration,
    MetricKind, Observation, ObservationValue, Shard, ShardSet, Submitter,
};
use tokio::io::AsyncReadExt as _;
use tokio_util::sync::CancellationToken;
use tower::{util::BoxCloneSyncService, BoxError, ServiceExt as _};

type MockService = BoxCloneSyncService<Request<Full<Bytes>>, Response<Full<Bytes>>, BoxError>;

/// A fake metrics backend that records every payload it receives.
#[derive(Clone, Default)]
struct Backend {
    payloads: Arc<Mutex<Vec<Vec<Value>>>>,
    requests: Arc<AtomicUsize>,
}

impl Backend {
    /// Builds a service that responds with `fail_status` to the first request and 202 to all others.
    fn service(&self, fail_status: Option<StatusCode>) -> MockService {
        let backend = self.clone();
        BoxCloneSyncService::new(tower::service_fn(move |request: Request<Full<Bytes>>| {
            let backend = backend.clone();
            async move {
                let body = request.into_body().collect().await?.to_bytes();
                let mut decoder = ZlibDecoder::new(&body[..]);
                let mut json = Vec::new();
                decoder.read_to_end(&mut json).await?;
                let payload: Value = serde_json::from_slice(&json)?;
                let series = payload["series"].as_array().cloned().unwrap_or_default();

                let n = backend.requests.fetch_add(1, Ordering::SeqCst);
                let status = match fail_status {
                    Some(status) if n == 0 => status,
                    _ => {
                        backend.payloads.lock().unwrap().push(series);
                        StatusCode::ACCEPTED
                    }
                };

                Ok::<_, BoxError>(Response::builder().status(status).body(Full::new(Bytes::new()))?)
            }
        }))
    }

    /// Builds a service whose first request panics, with every other request handled like [`Backend::service`].
    fn crashing_service(&self) -> MockService {
        let inner = self.service(None);
        let calls = Arc::new(AtomicUsize::new(0));
        BoxCloneSyncService::new(tower::service_fn(move |request: Request<Full<Bytes>>| {
            let inner = inner.clone();
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    panic!("backend crashed");
                }
                inner.oneshot(request).await
            }
        }))
    }

    fn series(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().iter().flatten().cloned().collect()
    }

    fn payload_sizes(&self) -> Vec<usize> {
        self.payloads.lock().unwrap().iter().map(Vec::len).collect()
    }
}

fn observation(name: &str, kind: MetricKind, value: ObservationValue, sample_rate: f64, digest: u32) -> Observation {
    Observation::new(name, kind, vec!["env:test".to_string()], value, sample_rate, digest).unwrap()
}

fn numeric(name: &str, kind: MetricKind, value: f64, sample_rate: f64, digest: u32) -> Observation {
    observation(name, kind, ObservationValue::Numeric(value), sample_rate, digest)
}

fn flusher(shards: Vec<Shard>, service: MockService, config: FlusherConfiguration) -> Flusher<MockService> {
    let forwarder = ForwarderConfiguration::new("http://metrics.test", "test-key");
    let submitter = Submitter::new(service, &forwarder).unwrap();
    Flusher::new(shards, submitter, &config).unwrap()
}

fn flusher_config() -> FlusherConfiguration {
    FlusherConfiguration::from_hostname("test-host")
}

fn find<'a>(series: &'a [Value], metric: &str) -> &'a Value {
    series
        .iter()
        .find(|s| s["metric"] == metric)
        .unwrap_or_else(|| panic!("missing series {}", metric))
}

fn point_value(series: &Value) -> f64 {
    series["points"][0][1].as_f64().unwrap()
}

/// Finds the value of the counter `name` carrying all of the given labels.
fn counter_value(snapshotter: &Snapshotter, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let key = key.key();
            let matches = key.name() == name
                && labels
                    .iter()
                    .all(|(k, v)| key.labels().any(|l| l.key() == *k && l.value() == *v));
            match (matches, value) {
                (true, DebugValue::Counter(n)) => Some(n),
                _ => None,
            }
        })
}

fn gauge_value(snapshotter: &Snapshotter, name: &str) -> Option<f64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| match value {
            DebugValue::Gauge(v) if key.key().name() == name => Some(v.into_inner()),
            _ => None,
        })
}

#[tokio::test]
async fn sampled_counter_reports_scaled_total() {
    let backend = Backend::default();
    let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
    for _ in 0..5 {
        shard.ingest(numeric("requests", MetricKind::Counter, 1.0, 0.5, 1));
    }

    let flusher = flusher(vec![shard], backend.service(None), flusher_config());
    let summary = flusher.flush().await;
    assert_eq!(
        summary,
        FlushSummary {
            records: 1,
            chunks: 1,
            failed_chunks: 0,
            dropped_records: 0,
        }
    );

    let series = backend.series();
    let requests = find(&series, "requests");
    assert_eq!(requests["type"], "count");
    assert_eq!(requests["interval"], 10);
    assert_eq!(requests["host"], "test-host");
    assert_eq!(requests["tags"], serde_json::json!(["env:test"]));
    assert_eq!(point_value(requests), 10.0);

    // Nothing new was ingested, so the next cycle is a no-op.
    assert_eq!(flusher.flush().await, FlushSummary::default());
    assert_eq!(backend.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gauge_reports_last_value() {
    let backend = Backend::default();
    let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
    for value in [10.0, 20.0, 15.0] {
        shard.ingest(numeric("temp", MetricKind::Gauge, value, 1.0, 1));
    }

    flusher(vec![shard], backend.service(None), flusher_config())
        .flush()
        .await;

    let series = backend.series();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0]["type"], "gauge");
    assert_eq!(point_value(&series[0]), 15.0);
    assert!(series[0].get("interval").is_none());
}

#[tokio::test]
async fn histogram_reports_summary_and_percentiles() {
    let backend = Backend::default();
    let config = AggregatorConfiguration {
        percentiles: vec![0.5, 0.99],
        ..Default::default()
    };
    let shard = Shard::new(0, &config).unwrap();
    for value in 1..=5 {
        shard.ingest(numeric("latency", MetricKind::Histogram, f64::from(value), 1.0, 1));
    }

    flusher(vec![shard], backend.service(None), flusher_config())
        .flush()
        .await;

    let series = backend.series();
    assert_eq!(series.len(), 6);
    assert_eq!(point_value(find(&series, "latency.count")), 5.0);
    assert_eq!(point_value(find(&series, "latency.min")), 1.0);
    assert_eq!(point_value(find(&series, "latency.max")), 5.0);
    assert_eq!(point_value(find(&series, "latency.avg")), 3.0);
    assert!(point_value(find(&series, "latency.50percentile")).approx_eq_ratio(&3.0, 0.01));
    assert!(point_value(find(&series, "latency.99percentile")).approx_eq_ratio(&5.0, 0.01));
    assert!(series.iter().all(|s| s["host"] == "test-host"));
}

#[tokio::test]
async fn set_reports_distinct_count() {
    let backend = Backend::default();
    let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
    for user in ["alice", "bob", "alice", "carol", "bob"] {
        shard.ingest(observation(
            "users",
            MetricKind::Set,
            ObservationValue::Element(user.to_string()),
            0.1,
            1,
        ));
    }

    flusher(vec![shard], backend.service(None), flusher_config())
        .flush()
        .await;

    let series = backend.series();
    assert_eq!(series[0]["type"], "gauge");
    assert_eq!(point_value(&series[0]), 3.0);
}

#[tokio::test]
async fn chunks_are_balanced_and_complete() {
    let backend = Backend::default();
    let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
    for i in 0..250u32 {
        shard.ingest(numeric(&format!("gauge.{}", i), MetricKind::Gauge, 1.0, 1.0, i));
    }

    let config = flusher_config().with_flush_max_per_body(100);
    let summary = flusher(vec![shard], backend.service(None), config).flush().await;
    assert_eq!(summary.records, 250);
    assert_eq!(summary.chunks, 3);

    let mut sizes = backend.payload_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, [83, 83, 84]);

    let mut names = backend
        .series()
        .iter()
        .map(|s| s["metric"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 250);
}

#[test]
fn failed_chunk_does_not_affect_others() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let backend = Backend::default();

    let summary = metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
            for i in 0..250u32 {
                shard.ingest(numeric(&format!("gauge.{}", i), MetricKind::Gauge, 1.0, 1.0, i));
            }

            let config = flusher_config().with_flush_max_per_body(100);
            let service = backend.service(Some(StatusCode::INTERNAL_SERVER_ERROR));
            flusher(vec![shard], service, config).flush().await
        })
    });

    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.failed_chunks, 1);
    assert_eq!(backend.requests.load(Ordering::SeqCst), 3);

    // The two other chunks were still accepted.
    let accepted = backend.series().len();
    assert_eq!(summary.dropped_records, 250 - accepted);
    assert!(summary.dropped_records == 83 || summary.dropped_records == 84);

    let dropped = u64::try_from(summary.dropped_records).unwrap();
    assert_eq!(
        counter_value(&snapshotter, "flush_errors_total", &[("cause", "500")]),
        Some(dropped)
    );
    assert_eq!(
        counter_value(&snapshotter, "flush_errors_total", &[("cause", "io")]),
        Some(0)
    );
    assert_eq!(counter_value(&snapshotter, "flush_chunks_total", &[]), Some(3));
}

#[tokio::test]
async fn crashed_submission_counts_as_dropped() {
    let backend = Backend::default();
    let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
    for i in 0..250u32 {
        shard.ingest(numeric(&format!("gauge.{}", i), MetricKind::Gauge, 1.0, 1.0, i));
    }

    let config = flusher_config().with_flush_max_per_body(100);
    let summary = flusher(vec![shard], backend.crashing_service(), config).flush().await;

    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.failed_chunks, 1);
    assert_eq!(summary.dropped_records, 250 - backend.series().len());
    assert!(summary.dropped_records == 83 || summary.dropped_records == 84);
}

#[test]
fn shard_telemetry() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let shard = Shard::new(2, &AggregatorConfiguration::default()).unwrap();
        for digest in 0..3 {
            shard.ingest(numeric("requests", MetricKind::Counter, 1.0, 1.0, digest));
        }
        shard.ingest(numeric("temp", MetricKind::Gauge, 1.0, 1.0, 9));
        shard.flush_and_reset(Duration::from_secs(10));
    });

    assert_eq!(
        counter_value(&snapshotter, "shard_observations_processed_total", &[("shard", "2")]),
        Some(4)
    );
    assert_eq!(
        counter_value(&snapshotter, "shard_aggregators_flushed_total", &[("metric_type", "counter")]),
        Some(3)
    );
    assert_eq!(
        counter_value(&snapshotter, "shard_aggregators_flushed_total", &[("metric_type", "gauge")]),
        Some(1)
    );
}

#[test]
fn empty_cycle_is_a_noop() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let backend = Backend::default();

    let summary = metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
            flusher(vec![shard], backend.service(None), flusher_config())
                .flush()
                .await
        })
    });

    assert_eq!(summary, FlushSummary::default());
    assert_eq!(backend.requests.load(Ordering::SeqCst), 0);

    assert_eq!(counter_value(&snapshotter, "flush_noop_total", &[]), Some(1));
}

#[test]
fn records_gauge_resets_on_empty_cycle() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let backend = Backend::default();

    let after_busy_cycle = metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
            shard.ingest(numeric("requests", MetricKind::Counter, 1.0, 1.0, 1));

            let flusher = flusher(vec![shard], backend.service(None), flusher_config());
            flusher.flush().await;
            let after_busy_cycle = gauge_value(&snapshotter, "flush_records_total");

            assert_eq!(flusher.flush().await, FlushSummary::default());
            after_busy_cycle
        })
    });

    assert_eq!(after_busy_cycle, Some(1.0));
    assert_eq!(gauge_value(&snapshotter, "flush_records_total"), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn run_flushes_on_interval_and_shutdown() {
    let backend = Backend::default();
    let shard = Shard::new(0, &AggregatorConfiguration::default()).unwrap();
    let config = flusher_config()
        .with_flush_interval(Duration::from_secs(10))
        .with_flush_on_shutdown(true);
    let flusher = flusher(vec![shard.clone()], backend.service(None), config);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(flusher.run(shutdown.clone()));

    shard.ingest(numeric("requests", MetricKind::Counter, 1.0, 1.0, 1));
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(backend.requests.load(Ordering::SeqCst), 1);

    shard.ingest(numeric("requests", MetricKind::Counter, 1.0, 1.0, 1));
    shutdown.cancel();
    handle.await.unwrap();
    assert_eq!(backend.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_and_flush_loses_nothing() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 2_500;

    let backend = Backend::default();
    let shutdown = CancellationToken::new();
    let ShardSet {
        router,
        shards,
        mut tasks,
    } = spawn_shards(4, 64, &AggregatorConfiguration::default(), &shutdown).unwrap();
    let flusher = Arc::new(flusher(shards, backend.service(None), flusher_config()));

    let mut producers = tokio::task::JoinSet::new();
    for producer in 0..PRODUCERS {
        let router = router.clone();
        producers.spawn(async move {
            for i in 0..PER_PRODUCER {
                let digest = producer * 100 + i % 50;
                router
                    .route(numeric("requests", MetricKind::Counter, 1.0, 1.0, digest))
                    .await
                    .unwrap();
            }
        });
    }

    let periodic = {
        let flusher = Arc::clone(&flusher);
        tokio::spawn(async move {
            for _ in 0..20 {
                flusher.flush().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    while let Some(result) = producers.join_next().await {
        result.unwrap();
    }
    periodic.await.unwrap();

    // Let the shards drain their queues, then take whatever is left.
    drop(router);
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    flusher.flush().await;

    let total = backend.series().iter().map(point_value).sum::<f64>();
    assert_eq!(total, f64::from(PRODUCERS * PER_PRODUCER));
}
