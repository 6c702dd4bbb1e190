//! PostgreSQL implementation of CorrelationRepository
//!
//! - Connection obtained from an injected [`ConnectionProvider`] on `initialize()`
//! - State transitions are a single conditional `UPDATE ... WHERE state = 'running'`,
//!   so racing finish calls on one record cannot both win

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use crate::codec::{encode_identity, ErrorCodec, ErrorPayload};
use crate::config::StorageConfig;
use crate::connection::ConnectionProvider;
use crate::error::{CorrelationError, Result};
use crate::models::{
    Correlation, CorrelationRecord, CorrelationState, FinishOutcome, NewCorrelation,
};
use crate::schema;
use crate::store::CorrelationRepository;

const SELECT_COLUMNS: &str = r#"
    SELECT id, correlation_id, process_instance_id, process_model_id, process_model_hash,
           parent_process_instance_id, identity, state, error, created_at, updated_at
    FROM correlations
"#;

const ORDER_BY_CREATION: &str = "ORDER BY created_at ASC, id ASC";

/// Connection the repository was configured with
struct Lifecycle {
    config: StorageConfig,
    provider: Arc<dyn ConnectionProvider>,
}

/// PostgreSQL implementation of CorrelationRepository
///
/// # Example
///
/// ```ignore
/// use procengine_correlation::{PgConnectionProvider, PostgresCorrelationRepository, StorageConfig};
///
/// let config = StorageConfig::from_env()?;
/// let repository = PostgresCorrelationRepository::new(config, PgConnectionProvider::shared());
/// repository.initialize().await?;
/// ```
pub struct PostgresCorrelationRepository {
    lifecycle: Option<Lifecycle>,
    pool: RwLock<Option<PgPool>>,
    init_lock: Mutex<()>,
    codec: ErrorCodec,
}

impl PostgresCorrelationRepository {
    /// Create a repository that connects through `provider` on `initialize()`
    pub fn new(config: StorageConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            lifecycle: Some(Lifecycle { config, provider }),
            pool: RwLock::new(None),
            init_lock: Mutex::new(()),
            codec: ErrorCodec::default(),
        }
    }

    /// Create an initialized repository around a caller-managed pool
    ///
    /// The schema is not touched; `dispose()` only drops the reference.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            lifecycle: None,
            pool: RwLock::new(Some(pool)),
            init_lock: Mutex::new(()),
            codec: ErrorCodec::default(),
        }
    }

    /// Replace the error codec
    pub fn with_codec(mut self, codec: ErrorCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Get the connection pool, if initialized
    pub fn pool(&self) -> Result<PgPool> {
        self.pool.read().clone().ok_or(CorrelationError::NotInitialized)
    }

    /// Open the connection and ensure the schema. Later calls are no-ops.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let Some(lifecycle) = &self.lifecycle else {
            return Err(CorrelationError::NotInitialized);
        };

        let pool = lifecycle.provider.get_connection(&lifecycle.config).await?;
        if lifecycle.config.ensure_schema {
            schema::ensure_schema(&pool).await?;
        }

        *self.pool.write() = Some(pool);
        debug!("correlation repository initialized");
        Ok(())
    }

    /// Release the connection. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn dispose(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        let pool = self.pool.write().take();

        if let (Some(_), Some(lifecycle)) = (pool, &self.lifecycle) {
            lifecycle
                .provider
                .destroy_connection(&lifecycle.config)
                .await?;
            debug!("correlation repository disposed");
        }
        Ok(())
    }

    async fn fetch_where(&self, condition: &str, value: &str) -> Result<Vec<Correlation>> {
        let pool = self.pool()?;
        let sql = format!("{} WHERE {} {}", SELECT_COLUMNS, condition, ORDER_BY_CREATION);

        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&pool)
            .await
            .map_err(|e| {
                error!("Failed to query correlations: {}", e);
                e
            })?;

        self.decode_rows(rows)
    }

    fn decode_rows(&self, rows: Vec<PgRow>) -> Result<Vec<Correlation>> {
        rows.iter()
            .map(|row| -> Result<Correlation> {
                Ok(record_from_row(row)?.into_correlation(&self.codec))
            })
            .collect()
    }

    async fn finish(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
        outcome: FinishOutcome,
    ) -> Result<()> {
        let pool = self.pool()?;
        let target = outcome.target_state();
        let error_text = match &outcome {
            FinishOutcome::Finished => None,
            FinishOutcome::Failed(payload) => Some(self.codec.encode(payload)),
        };

        let result = sqlx::query(
            r#"
            UPDATE correlations
            SET state = $3, error = $4, updated_at = GREATEST(NOW(), updated_at)
            WHERE correlation_id = $1 AND process_instance_id = $2 AND state = 'running'
            "#,
        )
        .bind(correlation_id)
        .bind(process_instance_id)
        .bind(target.as_str())
        .bind(&error_text)
        .execute(&pool)
        .await
        .map_err(|e| {
            error!("Failed to finish process instance: {}", e);
            e
        })?;

        if result.rows_affected() > 0 {
            debug!(%correlation_id, %process_instance_id, state = %target, "finished process instance");
            return Ok(());
        }

        // Nothing was running: distinguish a missing record from a terminal one.
        let row = sqlx::query(&format!(
            "SELECT state FROM correlations WHERE correlation_id = $1 AND process_instance_id = $2 {} LIMIT 1",
            ORDER_BY_CREATION
        ))
        .bind(correlation_id)
        .bind(process_instance_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!("Failed to read correlation state: {}", e);
            e
        })?;

        match row {
            None => Err(CorrelationError::not_found(format!(
                "No ProcessInstance with ID \"{}\" found in Correlation \"{}\".",
                process_instance_id, correlation_id
            ))),
            Some(row) => Err(CorrelationError::InvalidStateTransition {
                from: parse_state(&row.try_get::<String, _>("state")?)?,
                to: target,
            }),
        }
    }
}

#[async_trait]
impl CorrelationRepository for PostgresCorrelationRepository {
    #[instrument(skip(self, entry), fields(correlation_id = %entry.correlation_id))]
    async fn create(&self, entry: NewCorrelation) -> Result<()> {
        entry.validate()?;
        let pool = self.pool()?;

        sqlx::query(
            r#"
            INSERT INTO correlations (
                correlation_id, process_instance_id, process_model_id, process_model_hash,
                parent_process_instance_id, identity, state
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'running')
            "#,
        )
        .bind(&entry.correlation_id)
        .bind(&entry.process_instance_id)
        .bind(&entry.process_model_id)
        .bind(&entry.process_model_hash)
        .bind(&entry.parent_process_instance_id)
        .bind(encode_identity(entry.identity.as_ref()))
        .execute(&pool)
        .await
        .map_err(|e| {
            error!("Failed to create correlation: {}", e);
            e
        })?;

        debug!(
            process_instance_id = ?entry.process_instance_id,
            "created correlation entry"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_correlation_by_process_model_id(&self, process_model_id: &str) -> Result<()> {
        let pool = self.pool()?;

        let result = sqlx::query("DELETE FROM correlations WHERE process_model_id = $1")
            .bind(process_model_id)
            .execute(&pool)
            .await
            .map_err(|e| {
                error!("Failed to delete correlations: {}", e);
                e
            })?;

        debug!(
            %process_model_id,
            deleted = result.rows_affected(),
            "deleted correlations"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn finish_process_instance_in_correlation(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
    ) -> Result<()> {
        self.finish(correlation_id, process_instance_id, FinishOutcome::Finished)
            .await
    }

    #[instrument(skip(self, error))]
    async fn finish_process_instance_in_correlation_with_error(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
        error: ErrorPayload,
    ) -> Result<()> {
        self.finish(
            correlation_id,
            process_instance_id,
            FinishOutcome::Failed(error),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<Correlation>> {
        let pool = self.pool()?;
        let rows = sqlx::query(&format!("{} {}", SELECT_COLUMNS, ORDER_BY_CREATION))
            .fetch_all(&pool)
            .await
            .map_err(|e| {
                error!("Failed to list correlations: {}", e);
                e
            })?;

        self.decode_rows(rows)
    }

    #[instrument(skip(self))]
    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Correlation>> {
        let correlations = self
            .fetch_where("correlation_id = $1", correlation_id)
            .await?;

        if correlations.is_empty() {
            return Err(CorrelationError::not_found(format!(
                "Correlation with id \"{}\" not found.",
                correlation_id
            )));
        }
        Ok(correlations)
    }

    #[instrument(skip(self))]
    async fn get_by_process_model_id(&self, process_model_id: &str) -> Result<Vec<Correlation>> {
        let correlations = self
            .fetch_where("process_model_id = $1", process_model_id)
            .await?;

        if correlations.is_empty() {
            return Err(CorrelationError::not_found(format!(
                "No correlations for ProcessModel with ID \"{}\" found.",
                process_model_id
            )));
        }
        Ok(correlations)
    }

    #[instrument(skip(self))]
    async fn get_by_process_instance_id(&self, process_instance_id: &str) -> Result<Correlation> {
        let pool = self.pool()?;
        let row = sqlx::query(&format!(
            "{} WHERE process_instance_id = $1 {} LIMIT 1",
            SELECT_COLUMNS, ORDER_BY_CREATION
        ))
        .bind(process_instance_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!("Failed to get correlation: {}", e);
            e
        })?
        .ok_or_else(|| {
            CorrelationError::not_found(format!(
                "No correlations for ProcessInstance with ID \"{}\" found.",
                process_instance_id
            ))
        })?;

        Ok(record_from_row(&row)?.into_correlation(&self.codec))
    }

    #[instrument(skip(self))]
    async fn get_by_process_model_hash(
        &self,
        process_model_hash: &str,
    ) -> Result<Vec<Correlation>> {
        self.fetch_where("process_model_hash = $1", process_model_hash)
            .await
    }

    #[instrument(skip(self))]
    async fn get_by_process_model_hashes(
        &self,
        process_model_hashes: &[String],
    ) -> Result<Vec<Correlation>> {
        let pool = self.pool()?;
        if process_model_hashes.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(&format!(
            "{} WHERE process_model_hash = ANY($1) {}",
            SELECT_COLUMNS, ORDER_BY_CREATION
        ))
        .bind(process_model_hashes)
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            error!("Failed to query correlations by hashes: {}", e);
            e
        })?;

        self.decode_rows(rows)
    }

    #[instrument(skip(self))]
    async fn get_subprocesses_for_process_instance(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<Correlation>> {
        self.fetch_where("parent_process_instance_id = $1", process_instance_id)
            .await
    }

    #[instrument(skip(self))]
    async fn get_correlations_by_state(
        &self,
        state: CorrelationState,
    ) -> Result<Vec<Correlation>> {
        self.fetch_where("state = $1", state.as_str()).await
    }
}

fn parse_state(state: &str) -> Result<CorrelationState> {
    state
        .parse()
        .map_err(|e: String| CorrelationError::Storage(sqlx::Error::Decode(e.into())))
}

fn record_from_row(row: &PgRow) -> Result<CorrelationRecord> {
    let state: String = row.try_get("state")?;

    Ok(CorrelationRecord {
        id: row.try_get("id")?,
        correlation_id: row.try_get("correlation_id")?,
        process_instance_id: row.try_get("process_instance_id")?,
        process_model_id: row.try_get("process_model_id")?,
        process_model_hash: row.try_get("process_model_hash")?,
        parent_process_instance_id: row.try_get("parent_process_instance_id")?,
        identity: row.try_get("identity")?,
        state: parse_state(&state)?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
