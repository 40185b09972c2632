//! Cache write-access self-heal check
//!
//! Readiness gate for the transcription cache: diagnoses whether the current
//! database principal can write the cache table, applies the remediation
//! script when it cannot, and re-verifies. Idempotent and safe to run
//! repeatedly; operators run it before relying on the cache gateway.

use chartscribe_common::config::{resolve_database_url, TomlConfig};
use chartscribe_common::db::init_database_pool;
use chartscribe_common::Result;
use sqlx::PgPool;

/// Remediation applied when the cache is read-only. Operators can also run
/// the script directly.
const REMEDIATION_SCRIPT: &str = include_str!("../sql/heal_chart_transcriptions.sql");

const PROBE_CHART_ID: &str = "__selfheal_probe__";
const PROBE_TEXT: &str = "selfheal write probe";

/// Current write-access diagnosis. Recomputed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionStatus {
    Writable,
    ReadOnly { reason: String },
}

/// Terminal outcome of a full self-heal run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfHealOutcome {
    /// No connection string configured; the check cannot run
    NotConfigured,
    /// The cache was already writable; no remediation attempted
    Writable,
    /// The cache was read-only and remediation restored write access
    Healed,
    /// The cache is still read-only after remediation, or remediation failed
    StillBlocked { reason: String },
}

/// Facts gathered about the principal's access to the cache table
#[derive(Debug, Clone)]
pub struct WriteAccessFacts {
    /// Current execution principal (`current_user`)
    pub principal: String,
    pub table_exists: bool,
    /// Row-level security flag on the cache table
    pub rls_enabled: bool,
    /// Privileges granted to the principal (or PUBLIC) on the cache table
    pub grants: Vec<String>,
}

/// Pick the most specific reason for a failed write probe.
///
/// Priority: missing table → RLS enabled → missing INSERT/UPDATE grant →
/// unclassified probe failure.
pub fn classify_write_failure(facts: &WriteAccessFacts, probe_error: &str) -> String {
    if !facts.table_exists {
        return "cache table does not exist".to_string();
    }

    if facts.rls_enabled {
        return "RLS enabled".to_string();
    }

    for privilege in ["INSERT", "UPDATE"] {
        if !facts.grants.iter().any(|g| g == privilege) {
            return format!("missing {} grant for {}", privilege, facts.principal);
        }
    }

    format!("write probe failed: {}", probe_error)
}

/// The diagnostic-then-remediate-then-reverify workflow
pub struct PermissionCheck {
    pool: PgPool,
}

impl PermissionCheck {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gather the facts the reason classification is based on
    pub async fn gather_facts(&self) -> Result<WriteAccessFacts> {
        let principal: String = sqlx::query_scalar("SELECT current_user")
            .fetch_one(&self.pool)
            .await?;

        let table_exists: bool =
            sqlx::query_scalar("SELECT to_regclass('public.chart_transcriptions') IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        let rls_enabled: bool = if table_exists {
            sqlx::query_scalar(
                "SELECT relrowsecurity FROM pg_class \
                 WHERE oid = to_regclass('public.chart_transcriptions')",
            )
            .fetch_optional(&self.pool)
            .await?
            .unwrap_or(false)
        } else {
            false
        };

        let grants: Vec<String> = if table_exists {
            sqlx::query_scalar(
                "SELECT privilege_type FROM information_schema.role_table_grants \
                 WHERE table_schema = 'public' \
                   AND table_name = 'chart_transcriptions' \
                   AND grantee IN (current_user, 'PUBLIC')",
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            Vec::new()
        };

        Ok(WriteAccessFacts {
            principal,
            table_exists,
            rls_enabled,
            grants,
        })
    }

    /// Real write probe: insert a sentinel row, read it back, delete it, all
    /// in one committed transaction. Leaves the table net-unchanged.
    async fn run_probe(&self) -> std::result::Result<(), String> {
        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;

        sqlx::query(
            r#"
            INSERT INTO chart_transcriptions (
                chart_id, chart_signature, model, transcription_text
            ) VALUES ($1, $2, $3, $4)
            ON CONFLICT (chart_id) DO UPDATE SET
                transcription_text = EXCLUDED.transcription_text,
                updated_at = now()
            "#,
        )
        .bind(PROBE_CHART_ID)
        .bind(crate::signature::chart_signature(None))
        .bind("probe")
        .bind(PROBE_TEXT)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.to_string())?;

        let text: Option<String> =
            sqlx::query_scalar("SELECT transcription_text FROM chart_transcriptions WHERE chart_id = $1")
                .bind(PROBE_CHART_ID)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| e.to_string())?;

        if text.as_deref() != Some(PROBE_TEXT) {
            return Err("probe row did not round-trip".to_string());
        }

        sqlx::query("DELETE FROM chart_transcriptions WHERE chart_id = $1")
            .bind(PROBE_CHART_ID)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;

        tx.commit().await.map_err(|e| e.to_string())?;

        Ok(())
    }

    /// Checking phase: facts, then the probe.
    ///
    /// Diagnosis query failures are reported as read-only with the underlying
    /// message: the store is assumed broken until proven writable.
    pub async fn check(&self) -> PermissionStatus {
        let facts = match self.gather_facts().await {
            Ok(facts) => facts,
            Err(err) => {
                return PermissionStatus::ReadOnly {
                    reason: format!("diagnosis failed: {}", err),
                }
            }
        };

        tracing::info!(
            principal = %facts.principal,
            table_exists = facts.table_exists,
            rls_enabled = facts.rls_enabled,
            grants = ?facts.grants,
            "Gathered cache write-access facts"
        );

        match self.run_probe().await {
            Ok(()) => PermissionStatus::Writable,
            Err(probe_error) => {
                let reason = classify_write_failure(&facts, &probe_error);
                tracing::warn!(reason = %reason, "Cache table is not writable");
                PermissionStatus::ReadOnly { reason }
            }
        }
    }

    /// Remediating phase: apply the script in one transaction.
    ///
    /// # Errors
    /// Script failures roll back and propagate; nothing is re-verified.
    pub async fn remediate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::raw_sql(REMEDIATION_SCRIPT).execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::info!("Applied cache permission remediation script");

        Ok(())
    }

    /// Full workflow: check, remediate when read-only, re-verify.
    pub async fn run(&self) -> SelfHealOutcome {
        match self.check().await {
            PermissionStatus::Writable => {
                tracing::info!("Transcription cache is writable");
                SelfHealOutcome::Writable
            }
            PermissionStatus::ReadOnly { reason } => {
                tracing::warn!(reason = %reason, "Transcription cache is read-only, attempting remediation");

                if let Err(err) = self.remediate().await {
                    return SelfHealOutcome::StillBlocked {
                        reason: format!("remediation failed: {}", err),
                    };
                }

                // Verifying phase
                match self.check().await {
                    PermissionStatus::Writable => {
                        tracing::info!("Cache write access restored");
                        SelfHealOutcome::Healed
                    }
                    PermissionStatus::ReadOnly { reason } => {
                        tracing::error!(reason = %reason, "Cache still read-only after remediation");
                        SelfHealOutcome::StillBlocked { reason }
                    }
                }
            }
        }
    }
}

/// Run the check against an explicit connection string
pub async fn run_with_url(database_url: &str) -> SelfHealOutcome {
    let pool = match init_database_pool(database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            return SelfHealOutcome::StillBlocked {
                reason: format!("connection failed: {}", err),
            }
        }
    };

    PermissionCheck::new(pool).run().await
}

/// Run the check with the resolved configuration.
///
/// A missing connection string is a distinct outcome, not an error: the
/// check simply cannot proceed without one.
pub async fn run_from_env(toml_config: &TomlConfig) -> SelfHealOutcome {
    let database_url = match resolve_database_url(toml_config) {
        Ok(url) => url,
        Err(_) => {
            tracing::error!("No database connection string configured; cannot verify cache write access");
            return SelfHealOutcome::NotConfigured;
        }
    };

    run_with_url(&database_url).await
}
