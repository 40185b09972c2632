//! Persisted models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached chart transcription row
///
/// At most one live row exists per `chart_id`. `chart_signature` is the
/// content address of the chart data the transcription was produced from;
/// a slot that is re-transcribed with new data or a new model overwrites the
/// row in place.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TranscriptionRecord {
    /// External correlation key (the chart's slot in a report)
    pub chart_id: String,
    /// Content address of the chart data payload
    pub chart_signature: String,
    /// Model that produced the transcription (`"stub"` when unconfigured)
    pub model: String,
    pub transcription_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
