use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use submitter_core::notifier::{MultiNotifier, SqliteStatusStore, StatusEventStore};
use submitter_core::package::{DirectoryPackageBuilder, PackageBuilder};
use submitter_core::{
    create_status_system, load_config, validate_config, DeliveryClient, FsDeliveryClient,
    LogNotifier, QueueProcessor, SqliteSubmissionStore, StatusNotifier, SubmissionIntake,
    SubmissionQueue, UploadAssembler,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("submitter {} starting", VERSION);

    let config_path = std::env::var("SUBMITTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Database path: {:?}", config.database.path);
    info!("Upload root: {:?}", config.upload.root_dir);
    info!("Outbox: {:?}", config.delivery.outbox_dir);

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }

    let submission_store = Arc::new(
        SqliteSubmissionStore::new(&config.database.path)
            .context("Failed to open submission queue")?,
    );
    info!("Submission queue opened");

    let status_store: Arc<dyn StatusEventStore> = Arc::new(
        SqliteStatusStore::new(&config.database.path).context("Failed to open status log")?,
    );
    info!("Status log opened");

    let (status_handle, status_writer) =
        create_status_system(status_store, config.notifier.buffer_size);
    let writer_handle = tokio::spawn(status_writer.run());

    let notifier: Arc<dyn StatusNotifier> = Arc::new(MultiNotifier::new(vec![
        Arc::new(LogNotifier::new()),
        Arc::new(status_handle),
    ]));

    let queue = SubmissionQueue::new(submission_store);
    // Chunk intake for the upload transport. Abandoned sessions are swept.
    let builder: Arc<dyn PackageBuilder> = Arc::new(DirectoryPackageBuilder::new());
    let intake = SubmissionIntake::new(
        Arc::new(UploadAssembler::from_config(&config.upload)),
        builder,
        queue.clone(),
    );
    let sweeper = intake.assembler().spawn_idle_sweeper(
        config.upload.session_idle_timeout(),
        config.upload.session_sweep_interval(),
    );
    info!(
        "Upload intake ready (idle sessions expire after {:?})",
        config.upload.session_idle_timeout()
    );

    let delivery: Arc<dyn DeliveryClient> =
        Arc::new(FsDeliveryClient::new(config.delivery.clone()));
    info!("Using delivery client: {}", delivery.name());

    let processor = QueueProcessor::new(
        config.processor.clone(),
        queue,
        delivery,
        Arc::clone(&notifier),
    );
    processor
        .start()
        .await
        .context("Failed to start queue processor")?;
    info!("Queue processor started");

    shutdown_signal().await?;

    info!("Shutting down...");
    sweeper.abort();
    drop(intake);
    processor.stop().await;
    info!("Queue processor stopped");

    // The writer exits once every notifier handle is gone.
    drop(processor);
    drop(notifier);
    let _ = writer_handle.await;
    info!("Status writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    Ok(())
}
