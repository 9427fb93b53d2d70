use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod queries;

use queries::PgUserStore;

/// Open the users database with the pool limits the API runs under.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Apply the embedded migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Connect, migrate, and hand back the PostgreSQL user store.
pub async fn connect_user_store(database_url: &str) -> Result<PgUserStore, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL database");
    let pool = init_pool(database_url).await?;

    tracing::info!("Running database migrations");
    run_migrations(&pool).await?;

    Ok(PgUserStore::new(pool))
}
