//! Transcription cache gateway
//!
//! Persists `(chart id → transcription)` rows with idempotent upserts. At
//! most one live row exists per chart id: a re-transcription overwrites the
//! text, signature, model and `updated_at` in place.

use chartscribe_common::db::TranscriptionRecord;
use chartscribe_common::Result;
use sqlx::PgPool;

/// Gateway over the `chart_transcriptions` table
pub struct CacheGateway {
    pool: PgPool,
}

impl CacheGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update the transcription for a chart slot.
    ///
    /// Runs in an explicit transaction; any failure rolls back, so partial
    /// writes are never observable. Concurrent upserts for the same chart id
    /// resolve last-writer-wins in the storage engine; the dispatch queue
    /// upstream keeps concurrent transcription work low.
    ///
    /// # Errors
    /// Storage failures propagate; callers decide whether to proceed
    /// without caching.
    pub async fn upsert(
        &self,
        chart_id: &str,
        chart_signature: &str,
        model: &str,
        transcription_text: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chart_transcriptions (
                chart_id, chart_signature, model, transcription_text
            ) VALUES ($1, $2, $3, $4)
            ON CONFLICT (chart_id) DO UPDATE SET
                chart_signature = EXCLUDED.chart_signature,
                model = EXCLUDED.model,
                transcription_text = EXCLUDED.transcription_text,
                updated_at = now()
            "#,
        )
        .bind(chart_id)
        .bind(chart_signature)
        .bind(model)
        .bind(transcription_text)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(chart_id, "Cached chart transcription");

        Ok(())
    }

    /// Load the cached transcription for a chart slot
    pub async fn get(&self, chart_id: &str) -> Result<Option<TranscriptionRecord>> {
        let record = sqlx::query_as::<_, TranscriptionRecord>(
            r#"
            SELECT chart_id, chart_signature, model, transcription_text,
                   created_at, updated_at
            FROM chart_transcriptions
            WHERE chart_id = $1
            "#,
        )
        .bind(chart_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Connection pool, shared with the self-heal check
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
