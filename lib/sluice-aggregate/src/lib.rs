//! Sharded metrics aggregation and flushing.
//!
//! Observations are routed by digest to a fixed set of [`Shard`]s, each of which aggregates the series it owns in
//! memory. On every flush interval, the [`Flusher`] swaps out the state of every shard, turns it into
//! [`FlushRecord`]s, and submits them to the metrics backend in size-bounded chunks, concurrently, through a
//! [`Submitter`].

/// A generic error type.
pub type GenericError = anyhow::Error;

pub mod aggregator;

pub mod client;

mod config;
pub use self::config::{AggregatorConfiguration, ConfigError, FlusherConfiguration, ForwarderConfiguration};

mod flusher;
pub use self::flusher::{partition, FlushSummary, Flusher};

mod observation;
pub use self::observation::{MetricKind, Observation, ObservationError, ObservationValue};

mod record;
pub use self::record::{FlushRecord, SeriesType};

mod router;
pub use self::router::{spawn_shards, RouteError, ShardRouter, ShardSet};

mod shard;
pub use self::shard::Shard;

mod submitter;
pub use self::submitter::{SubmitError, Submitter};

mod telemetry;
