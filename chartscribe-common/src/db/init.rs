//! Database connection and schema bootstrap
//!
//! Connects to the Postgres store holding the transcription cache and creates
//! the cache table when it does not exist yet.

use crate::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Name of the transcription cache table
pub const TRANSCRIPTION_TABLE: &str = "chart_transcriptions";

/// Initialize database connection pool
pub async fn init_database_pool(database_url: &str) -> Result<PgPool> {
    tracing::debug!("Connecting to transcription cache database");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Create the transcription cache table if it does not exist
///
/// Idempotent; safe to run on every startup.
pub async fn create_transcription_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chart_transcriptions (
            chart_id TEXT PRIMARY KEY,
            chart_signature TEXT NOT NULL,
            model TEXT NOT NULL,
            transcription_text TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (chart_transcriptions)");

    Ok(())
}
