use axum::routing::get;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use motto_transcribe::{
    app_state::{self, AppState},
    config::AppConfig,
    db,
    routes,
    services::{
        encryption::MottoCipher,
        storage::UploadStorage,
        user_store::{MemoryUserStore, UserStore},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing motto-transcribe server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    // Users live in PostgreSQL when configured
    let users: Arc<dyn UserStore> = match &config.database_url {
        Some(url) => Arc::new(
            db::connect_user_store(url)
                .await
                .expect("Failed to initialize user database"),
        ),
        None => {
            tracing::warn!("DATABASE_URL not set, keeping users in memory");
            Arc::new(MemoryUserStore::new())
        }
    };

    tracing::info!("Initializing job store and queue");
    let backends = app_state::job_backends(&config).expect("Failed to initialize job backends");

    tracing::info!("Initializing AES-256-GCM motto encryption");
    let cipher = MottoCipher::from_config(config.encryption_key.as_deref())
        .expect("Failed to initialize encryption");

    let storage =
        UploadStorage::new(&config.upload_dir).expect("Failed to create upload directory");

    let bind_addr = config.bind_addr.clone();
    let body_limit = config.max_request_bytes();
    let state = AppState::new(
        config,
        users,
        backends.jobs.clone(),
        backends.queue.clone(),
        storage,
        cipher,
    );

    // Without Redis nobody else can see the queue, so work it here.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_tasks = Vec::new();
    if backends.in_process {
        tracing::info!("REDIS_URL not set, running embedded worker");
        let worker = Arc::new(
            app_state::worker(
                &state.config,
                backends.jobs.clone(),
                backends.queue.clone(),
                state.storage.clone(),
            )
            .expect("Failed to initialize worker"),
        );
        for _ in 0..state.config.worker_concurrency.max(1) {
            let worker = worker.clone();
            let shutdown = shutdown_rx.clone();
            worker_tasks.push(tokio::spawn(async move { worker.run(shutdown).await }));
        }
        let janitor = worker.clone();
        let shutdown = shutdown_rx.clone();
        worker_tasks.push(tokio::spawn(async move { janitor.run_janitor(shutdown).await }));
    }

    // Build API routes
    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting motto-transcribe on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    shutdown_tx.send(true).ok();
    for task in worker_tasks {
        task.await.ok();
    }
}
