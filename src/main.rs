use anyhow::{Context, Result};
use clap::Parser;
use kinesis_event_sink::{
    AppConfig, AwsClients, DynamoDbCheckpointStore, DynamoDbEventStore, EventProcessorFactory,
    MetricsAggregator, PollingCoordinator,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    config.validate()?;
    info!(
        stream = %config.stream_name,
        application = %config.application_name,
        table = %config.table_name,
        region = %config.region,
        "Starting kinesis-event-sink"
    );

    let clients = AwsClients::from_config(&config).await;

    let event_store = DynamoDbEventStore::builder()
        .with_client(clients.dynamodb.clone())
        .with_table_name(&config.table_name)
        .build()
        .context("Failed to build event store")?;

    let checkpoint_store = DynamoDbCheckpointStore::builder()
        .with_client(clients.dynamodb.clone())
        .with_table_name(&config.application_name)
        .build()
        .context("Failed to build checkpoint store")?;

    let mut factory = EventProcessorFactory::new(Arc::new(event_store));

    let monitoring = config.monitoring_config();
    let metrics_handle = if monitoring.enabled {
        let (tx, rx) = mpsc::channel(monitoring.channel_size);
        factory = factory.with_monitoring(tx);
        let aggregator = MetricsAggregator::new(monitoring.metrics_interval, rx);
        Some(tokio::spawn(aggregator.run()))
    } else {
        None
    };

    let coordinator = PollingCoordinator::new(
        config.coordinator_config(),
        factory,
        clients.kinesis,
        checkpoint_store,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for interrupt, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    coordinator.run(shutdown_rx).await?;

    // Dropping the coordinator closes the monitoring channel.
    drop(coordinator);
    if let Some(handle) = metrics_handle {
        handle.await.context("Metrics aggregator task failed")?;
    }

    info!("kinesis-event-sink stopped");
    Ok(())
}
