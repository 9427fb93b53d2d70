use motto_transcribe::{
    app_state,
    config::AppConfig,
    services::storage::UploadStorage,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting transcription worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // A standalone worker only makes sense against a shared queue.
    if config.redis_url.is_none() {
        tracing::error!("REDIS_URL must be set to run a standalone worker");
        std::process::exit(1);
    }

    tracing::info!("Initializing services");
    let backends = app_state::job_backends(&config).expect("Failed to initialize job backends");
    let storage = Arc::new(
        UploadStorage::new(&config.upload_dir).expect("Failed to open upload directory"),
    );

    let worker = Arc::new(
        app_state::worker(&config, backends.jobs, backends.queue, storage)
            .expect("Failed to initialize worker"),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let concurrency = config.worker_concurrency.max(1);
    tracing::info!(concurrency, "Worker ready, starting job processing loops");

    for _ in 0..concurrency {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }
    {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { worker.run_janitor(shutdown).await }));
    }

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received, finishing in-flight jobs");
    shutdown_tx.send(true).ok();

    for task in tasks {
        task.await.ok();
    }

    tracing::info!("Worker stopped");
}
