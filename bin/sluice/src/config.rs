use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::Deserialize;
use sluice_aggregate::{AggregatorConfiguration, ConfigError, FlusherConfiguration, ForwarderConfiguration};
use sluice_config::{ConfigurationError, ConfigurationLoader};

/// Prefix of environment variables holding configuration values.
pub const ENVIRONMENT_PREFIX: &str = "SLUICE";

/// Sharded metrics aggregation and forwarding.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/sluice/sluice.yaml")]
    pub config: PathBuf,
}

fn default_udp_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8126))
}

const fn default_num_workers() -> usize {
    4
}

const fn default_shard_queue_capacity() -> usize {
    4096
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfiguration {
    /// Address to listen for line protocol datagrams on.
    ///
    /// Defaults to `127.0.0.1:8126`.
    #[serde(default = "default_udp_address")]
    pub udp_address: SocketAddr,

    /// Number of shards.
    ///
    /// Defaults to 4.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Capacity of each shard's input queue.
    ///
    /// Defaults to 4096.
    #[serde(default = "default_shard_queue_capacity")]
    pub shard_queue_capacity: usize,

    #[serde(flatten)]
    pub aggregator: AggregatorConfiguration,

    #[serde(flatten)]
    pub flusher: FlusherConfiguration,

    #[serde(flatten)]
    pub forwarder: ForwarderConfiguration,
}

impl ServerConfiguration {
    /// Loads the configuration from the given YAML file, with `SLUICE_`-prefixed environment variables layered on top.
    ///
    /// # Errors
    ///
    /// If the file does not exist, or the configuration could not be deserialized, an error is returned.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        ConfigurationLoader::default()
            .from_yaml(path)?
            .from_environment(ENVIRONMENT_PREFIX)?
            .into_typed()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If any part of the configuration is invalid, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroShards);
        }

        if self.shard_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        self.aggregator.validate()?;
        self.flusher.validate()?;
        self.forwarder.validate()
    }
}
