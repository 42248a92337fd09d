//! Sharded metrics aggregation and forwarding service.
//!
//! Listens for line protocol metrics over UDP, aggregates them across a fixed set of shards over a flush interval, and
//! ships the aggregated series to the metrics backend.

#![deny(warnings)]
#![deny(missing_docs)]

use anyhow::Context as _;
use clap::Parser as _;
use sluice_aggregate::{client::HttpClientBuilder, spawn_shards, Flusher, GenericError, ShardSet, Submitter};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod codec;

mod config;
use self::config::{Cli, ServerConfiguration};

mod listener;
use self::listener::UdpListener;

mod logging;
use self::logging::{fatal_and_exit, initialize_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(None) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    match run(cli).await {
        Ok(()) => info!("sluice stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    let config = ServerConfiguration::load(&cli.config)
        .with_context(|| format!("failed to load configuration from '{}'", cli.config.display()))?;
    config.validate().context("invalid configuration")?;

    let client = HttpClientBuilder::default()
        .with_request_timeout(config.forwarder.request_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let submitter = Submitter::new(client, &config.forwarder)?;

    // Shards and the listener stop first. The flusher has its own token so that its final flush runs only after every
    // shard has drained its queue.
    let shutdown = CancellationToken::new();
    let flusher_shutdown = CancellationToken::new();

    let ShardSet {
        router,
        shards,
        tasks: mut shard_tasks,
    } = spawn_shards(config.num_workers, config.shard_queue_capacity, &config.aggregator, &shutdown)?;

    let flusher = Flusher::new(shards, submitter, &config.flusher)?;
    let flusher_task = tokio::spawn(flusher.run(flusher_shutdown.clone()));

    let listener = UdpListener::bind(config.udp_address, router).await?;
    info!(
        address = %listener.local_addr()?,
        shards = config.num_workers,
        flush_interval_secs = config.flusher.flush_interval().as_secs(),
        "sluice started."
    );
    let mut listener_task = tokio::spawn(listener.run(shutdown.clone()));

    select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Received shutdown signal. Shutting down.");
        }
        result = &mut listener_task => {
            warn!("Listener stopped unexpectedly. Shutting down.");
            result?;
        }
    }

    shutdown.cancel();
    if !listener_task.is_finished() {
        listener_task.await?;
    }

    while let Some(result) = shard_tasks.join_next().await {
        result?;
    }

    flusher_shutdown.cancel();
    flusher_task.await?;

    Ok(())
}
