//! CorrelationRepository trait definition

use async_trait::async_trait;

use crate::codec::{ErrorPayload, Identity};
use crate::error::Result;
use crate::models::{Correlation, CorrelationState, NewCorrelation};

/// Store for correlation records
///
/// Every operation is an independent request against storage. Lookups keyed
/// by an identifier the caller is expected to know (correlation id, process
/// model id, process instance id) fail with `NotFound` when nothing matches;
/// exploratory lookups (state, hash, subprocesses, everything) return an
/// empty list instead.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait CorrelationRepository: Send + Sync + 'static {
    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert a new record in state `running`
    ///
    /// No uniqueness check is performed; a sub-process may be recorded
    /// independently of its parent under the same keys.
    async fn create(&self, entry: NewCorrelation) -> Result<()>;

    /// Insert a new record from positional arguments
    async fn create_entry(
        &self,
        identity: Option<&Identity>,
        correlation_id: &str,
        process_instance_id: &str,
        process_model_id: &str,
        process_model_hash: &str,
        parent_process_instance_id: Option<&str>,
    ) -> Result<()> {
        let mut entry = NewCorrelation::new(correlation_id, process_model_hash)
            .with_process_instance_id(process_instance_id)
            .with_process_model_id(process_model_id);
        entry.identity = identity.cloned();
        entry.parent_process_instance_id = parent_process_instance_id.map(str::to_string);

        self.create(entry).await
    }

    /// Delete every record of a process model. Succeeds when nothing matched.
    async fn delete_correlation_by_process_model_id(&self, process_model_id: &str) -> Result<()>;

    /// Transition `running -> finished`
    async fn finish_process_instance_in_correlation(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
    ) -> Result<()>;

    /// Transition `running -> error`, recording the encoded error
    async fn finish_process_instance_in_correlation_with_error(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
        error: ErrorPayload,
    ) -> Result<()>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// All records in creation order; empty when there are none
    async fn get_all(&self) -> Result<Vec<Correlation>>;

    /// Records of one correlation, oldest first
    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Correlation>>;

    /// Records of one process model, oldest first
    async fn get_by_process_model_id(&self, process_model_id: &str) -> Result<Vec<Correlation>>;

    /// The correlation a process instance belongs to
    async fn get_by_process_instance_id(&self, process_instance_id: &str) -> Result<Correlation>;

    /// Records created from one process model version, oldest first
    async fn get_by_process_model_hash(&self, process_model_hash: &str)
        -> Result<Vec<Correlation>>;

    /// Records created from any of the given process model versions, oldest first
    async fn get_by_process_model_hashes(
        &self,
        process_model_hashes: &[String],
    ) -> Result<Vec<Correlation>>;

    /// Direct children of a process instance, oldest first
    async fn get_subprocesses_for_process_instance(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<Correlation>>;

    /// Records in the given state, oldest first
    async fn get_correlations_by_state(&self, state: CorrelationState)
        -> Result<Vec<Correlation>>;
}
