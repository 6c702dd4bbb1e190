// Correlation table definition
//
// Applied on initialize when `ensure_schema` is set. Every statement is
// idempotent so repeated initialization from several startup paths is safe.

use sqlx::PgPool;
use tracing::{debug, error};

use crate::error::Result;

pub const TABLE: &str = "correlations";

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS correlations (
        id BIGSERIAL PRIMARY KEY,
        correlation_id TEXT NOT NULL,
        process_instance_id TEXT,
        process_model_id TEXT,
        process_model_hash TEXT NOT NULL,
        parent_process_instance_id TEXT,
        identity TEXT,
        state TEXT NOT NULL DEFAULT 'running'
            CHECK (state IN ('running', 'finished', 'error')),
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_correlations_correlation_id ON correlations (correlation_id)",
    "CREATE INDEX IF NOT EXISTS idx_correlations_process_instance_id ON correlations (process_instance_id)",
    "CREATE INDEX IF NOT EXISTS idx_correlations_process_model_id ON correlations (process_model_id)",
    "CREATE INDEX IF NOT EXISTS idx_correlations_process_model_hash ON correlations (process_model_hash)",
    "CREATE INDEX IF NOT EXISTS idx_correlations_parent_process_instance_id ON correlations (parent_process_instance_id)",
    "CREATE INDEX IF NOT EXISTS idx_correlations_state ON correlations (state)",
];

/// Create the correlations table and its indexes if missing
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            error!("Failed to ensure correlation schema: {}", e);
            e
        })?;
    }

    debug!(table = TABLE, "correlation schema ready");
    Ok(())
}
