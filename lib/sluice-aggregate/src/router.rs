use snafu::Snafu;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::{AggregatorConfiguration, ConfigError};
use crate::observation::Observation;
use crate::shard::Shard;

/// Routing error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RouteError {
    /// The destination shard is no longer accepting observations.
    #[snafu(display("shard {} is closed", shard))]
    ShardClosed {
        /// Index of the closed shard.
        shard: usize,
    },
}

/// Routes observations to shards by digest.
///
/// A series always lands on the same shard: the shard is chosen as `digest % shard_count`.
#[derive(Clone)]
pub struct ShardRouter {
    senders: Vec<mpsc::Sender<Observation>>,
}

impl ShardRouter {
    /// Creates a new `ShardRouter` over the given shard inputs.
    ///
    /// # Errors
    ///
    /// If no senders are given, an error is returned.
    pub fn new(senders: Vec<mpsc::Sender<Observation>>) -> Result<Self, ConfigError> {
        if senders.is_empty() {
            return Err(ConfigError::ZeroShards);
        }

        Ok(Self { senders })
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    /// Returns the index of the shard responsible for the given digest.
    pub fn shard_for(&self, digest: u32) -> usize {
        digest as usize % self.senders.len()
    }

    /// Sends an observation to its shard, waiting for queue capacity if necessary.
    ///
    /// # Errors
    ///
    /// If the destination shard has stopped, an error is returned.
    pub async fn route(&self, observation: Observation) -> Result<(), RouteError> {
        let shard = self.shard_for(observation.digest());
        self.senders[shard]
            .send(observation)
            .await
            .map_err(|_| RouteError::ShardClosed { shard })
    }
}

/// A set of running shards.
pub struct ShardSet {
    /// Router feeding the shards.
    pub router: ShardRouter,

    /// Handles to the shards, for flushing.
    pub shards: Vec<Shard>,

    /// Tasks running each shard's ingestion loop.
    pub tasks: JoinSet<()>,
}

/// Creates `count` shards and spawns their ingestion loops on the current runtime.
///
/// Each shard gets its own bounded input queue of `queue_capacity` observations. The loops run until `shutdown` is
/// triggered or the router (and all its clones) are dropped.
///
/// # Errors
///
/// If `count` or `queue_capacity` is zero, or the aggregator configuration is invalid, an error is returned.
pub fn spawn_shards(
    count: usize, queue_capacity: usize, config: &AggregatorConfiguration, shutdown: &CancellationToken,
) -> Result<ShardSet, ConfigError> {
    if count == 0 {
        return Err(ConfigError::ZeroShards);
    }

    if queue_capacity == 0 {
        return Err(ConfigError::ZeroQueueCapacity);
    }

    let mut senders = Vec::with_capacity(count);
    let mut shards = Vec::with_capacity(count);
    let mut tasks = JoinSet::new();

    for id in 0..count {
        let shard = Shard::new(id, config)?;
        let (tx, rx) = mpsc::channel(queue_capacity);

        tasks.spawn(shard.clone().run(rx, shutdown.child_token()));
        senders.push(tx);
        shards.push(shard);
    }

    Ok(ShardSet {
        router: ShardRouter::new(senders)?,
        shards,
        tasks,
    })
}
