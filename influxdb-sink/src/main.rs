use anyhow::{Context, Result};
use clap::Parser;
use influxdb_sink::{
    BatchingEngine, BoxedStoreClient, InfluxDbClient, JsonFieldMapper, JsonRecord, LoggingSink,
    MockStoreClient, SinkConfig, StoreClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "influxdb-sink")]
#[command(about = "Batch newline-delimited JSON metrics from stdin into InfluxDB")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Keep written points in memory instead of sending them to InfluxDB
    #[arg(long)]
    mock_store: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = SinkConfig::load(args.config.as_deref())?;
    info!("Loaded configuration: {:?}", config.engine);

    let client: BoxedStoreClient = if args.mock_store {
        warn!("Using in-memory store, nothing will reach InfluxDB");
        Arc::new(MockStoreClient::new())
    } else {
        Arc::new(InfluxDbClient::new(config.store.clone()).context("Failed to create InfluxDB client")?)
    };

    let engine = BatchingEngine::new(
        &config.engine,
        config.store.measurement_prefix.clone(),
        client.clone(),
        LoggingSink::<JsonRecord>::new(),
    )
    .context("Failed to create batching engine")?
    .with_mapper(JsonFieldMapper::from_config(&config.mapper));

    let (sender, receiver) = flume::bounded(config.engine.channel_capacity);
    // Ctrl+C stops reading input; the engine finishes once the channel is
    // empty and closed. A second Ctrl+C stops the engine right away.
    let input = CancellationToken::new();
    let cancel = CancellationToken::new();

    let (input_token, engine_token) = (input.clone(), cancel.clone());
    tokio::spawn(async move {
        for token in [input_token, engine_token] {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            token.cancel();
            info!("Received Ctrl+C, shutting down (press again to stop immediately)");
        }
    });

    let reader_token = input.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut offset = 0u64;
        loop {
            let line = tokio::select! {
                _ = reader_token.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    offset += 1;
                    match serde_json::from_str(&line) {
                        Ok(payload) => {
                            if let Err(e) = sender.send_async(JsonRecord::new(offset, payload)).await {
                                warn!("Engine stopped, {} was not processed", e.into_inner());
                                break;
                            }
                        }
                        Err(e) => warn!("Skipping line {}: invalid JSON: {}", offset, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
        info!("Input finished after {} lines", offset);
    });

    let metrics = engine.metrics().clone();
    let report = engine.run(receiver, cancel).await;
    if let Err(e) = reader.await {
        error!("Input reader failed: {}", e);
    }

    let snapshot = metrics.snapshot();
    let stats = client.get_stats();
    info!(
        "Final flush: {} points, {} records acked, {} failed",
        report.points_written, report.records_acked, report.records_failed
    );
    info!(
        "Totals: {} points written, {} dropped, {} fields dropped, {} records acked, {} failed, {} store writes",
        snapshot.points_written,
        snapshot.points_dropped,
        snapshot.fields_dropped,
        snapshot.records_acked,
        snapshot.records_failed,
        stats.total_writes
    );

    Ok(())
}
