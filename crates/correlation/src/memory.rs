//! In-memory implementation of CorrelationRepository
//!
//! Same semantics as the PostgreSQL implementation, including ordering,
//! not-found policy and state-transition guards.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::codec::{encode_identity, ErrorCodec, ErrorPayload};
use crate::error::{CorrelationError, Result};
use crate::models::{
    Correlation, CorrelationRecord, CorrelationState, FinishOutcome, NewCorrelation,
};
use crate::store::CorrelationRepository;

/// In-memory implementation of CorrelationRepository
///
/// Records are kept in insertion order, which is also creation order.
///
/// # Example
///
/// ```
/// use procengine_correlation::InMemoryCorrelationRepository;
///
/// let repository = InMemoryCorrelationRepository::new();
/// assert_eq!(repository.len(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCorrelationRepository {
    records: RwLock<Vec<CorrelationRecord>>,
    codec: ErrorCodec,
}

impl InMemoryCorrelationRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository using a custom error codec
    pub fn with_codec(codec: ErrorCodec) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            codec,
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Raw stored rows (for testing)
    pub fn records(&self) -> Vec<CorrelationRecord> {
        self.records.read().clone()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.records.write().clear();
    }

    fn select<P>(&self, predicate: P) -> Vec<Correlation>
    where
        P: Fn(&CorrelationRecord) -> bool,
    {
        let records = self.records.read();
        let mut matched: Vec<CorrelationRecord> =
            records.iter().filter(|r| predicate(*r)).cloned().collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matched
            .into_iter()
            .map(|r| r.into_correlation(&self.codec))
            .collect()
    }

    fn finish(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
        outcome: FinishOutcome,
    ) -> Result<()> {
        let mut records = self.records.write();
        let matches = |r: &CorrelationRecord| {
            r.correlation_id == correlation_id
                && r.process_instance_id.as_deref() == Some(process_instance_id)
        };

        let Some(first) = records.iter().find(|r| matches(*r)) else {
            return Err(CorrelationError::not_found(format!(
                "No ProcessInstance with ID \"{}\" found in Correlation \"{}\".",
                process_instance_id, correlation_id
            )));
        };
        let first_state = first.state;

        let now = Utc::now();
        let mut applied = 0;
        for record in records
            .iter_mut()
            .filter(|r| matches(&**r) && r.state == CorrelationState::Running)
        {
            record.finish(&outcome, &self.codec, now)?;
            applied += 1;
        }

        if applied == 0 {
            return Err(CorrelationError::InvalidStateTransition {
                from: first_state,
                to: outcome.target_state(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CorrelationRepository for InMemoryCorrelationRepository {
    async fn create(&self, entry: NewCorrelation) -> Result<()> {
        entry.validate()?;

        let mut records = self.records.write();
        let last = records.last();
        let id = last.map(|r| r.id + 1).unwrap_or(1);
        let now = last
            .map(|r| Utc::now().max(r.created_at))
            .unwrap_or_else(Utc::now);

        records.push(CorrelationRecord {
            id,
            correlation_id: entry.correlation_id,
            process_instance_id: entry.process_instance_id,
            process_model_id: entry.process_model_id,
            process_model_hash: entry.process_model_hash,
            parent_process_instance_id: entry.parent_process_instance_id,
            identity: encode_identity(entry.identity.as_ref()),
            state: CorrelationState::Running,
            error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn delete_correlation_by_process_model_id(&self, process_model_id: &str) -> Result<()> {
        self.records
            .write()
            .retain(|r| r.process_model_id.as_deref() != Some(process_model_id));
        Ok(())
    }

    async fn finish_process_instance_in_correlation(
        &self,
        correlation_id: &str,
        process_instance_id: &str,
    ) -> Result<()> {
        self.finish(correlation_id, process_instance_id, FinishOutcome::Finished)
    }

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
    }

    async fn get_all(&self) -> Result<Vec<Correlation>> {
        Ok(self.select(|_| true))
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Correlation>> {
        let correlations = self.select(|r| r.correlation_id == correlation_id);
        if correlations.is_empty() {
            return Err(CorrelationError::not_found(format!(
                "Correlation with id \"{}\" not found.",
                correlation_id
            )));
        }
        Ok(correlations)
    }

    async fn get_by_process_model_id(&self, process_model_id: &str) -> Result<Vec<Correlation>> {
        let correlations =
            self.select(|r| r.process_model_id.as_deref() == Some(process_model_id));
        if correlations.is_empty() {
            return Err(CorrelationError::not_found(format!(
                "No correlations for ProcessModel with ID \"{}\" found.",
                process_model_id
            )));
        }
        Ok(correlations)
    }

    async fn get_by_process_instance_id(&self, process_instance_id: &str) -> Result<Correlation> {
        self.select(|r| r.process_instance_id.as_deref() == Some(process_instance_id))
            .into_iter()
            .next()
            .ok_or_else(|| {
                CorrelationError::not_found(format!(
                    "No correlations for ProcessInstance with ID \"{}\" found.",
                    process_instance_id
                ))
            })
    }

    async fn get_by_process_model_hash(
        &self,
        process_model_hash: &str,
    ) -> Result<Vec<Correlation>> {
        Ok(self.select(|r| r.process_model_hash == process_model_hash))
    }

    async fn get_by_process_model_hashes(
        &self,
        process_model_hashes: &[String],
    ) -> Result<Vec<Correlation>> {
        Ok(self.select(|r| process_model_hashes.contains(&r.process_model_hash)))
    }

    async fn get_subprocesses_for_process_instance(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<Correlation>> {
        Ok(self.select(|r| r.parent_process_instance_id.as_deref() == Some(process_instance_id)))
    }

    async fn get_correlations_by_state(
        &self,
        state: CorrelationState,
    ) -> Result<Vec<Correlation>> {
        Ok(self.select(|r| r.state == state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::codec::{CodecError, ErrorClass, ErrorSerializer, Identity, ProcessError};

    async fn seeded() -> InMemoryCorrelationRepository {
        let repository = InMemoryCorrelationRepository::new();
        repository
            .create_entry(None, "corr-1", "pi-1", "model-a", "h1", None)
            .await
            .unwrap();
        repository
            .create_entry(None, "corr-1", "pi-2", "model-b", "h2", Some("pi-1"))
            .await
            .unwrap();
        repository
            .create_entry(None, "corr-2", "pi-3", "model-a", "h1", None)
            .await
            .unwrap();
        repository
    }

    #[tokio::test]
    async fn test_create_and_get_by_process_instance() {
        let repository = InMemoryCorrelationRepository::new();
        let identity = Identity::new("token", "user-1");

        repository
            .create_entry(Some(&identity), "corr-1", "pi-1", "model-a", "h1", None)
            .await
            .unwrap();

        let correlation = repository.get_by_process_instance_id("pi-1").await.unwrap();
        assert_eq!(correlation.id, "corr-1");
        assert_eq!(correlation.state, CorrelationState::Running);
        assert_eq!(correlation.identity, Some(identity));
        assert_eq!(correlation.error, None);
        assert_eq!(correlation.created_at, correlation.updated_at);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_ids() {
        let repository = InMemoryCorrelationRepository::new();

        let err = repository
            .create(NewCorrelation::new("", "h1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Validation(_)));

        let err = repository
            .create(NewCorrelation::new("corr-1", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Validation(_)));
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_allowed() {
        let repository = InMemoryCorrelationRepository::new();
        for _ in 0..2 {
            repository
                .create_entry(None, "corr-1", "pi-1", "model-a", "h1", None)
                .await
                .unwrap();
        }
        assert_eq!(repository.len(), 2);
    }

    #[tokio::test]
    async fn test_get_all_empty_is_ok() {
        let repository = InMemoryCorrelationRepository::new();
        assert!(repository.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyed_lookups_not_found() {
        let repository = seeded().await;

        assert!(repository
            .get_by_correlation_id("unknown")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(repository
            .get_by_process_model_id("unknown")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(repository
            .get_by_process_instance_id("unknown")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_exploratory_lookups_empty() {
        let repository = seeded().await;

        assert!(repository
            .get_correlations_by_state(CorrelationState::Finished)
            .await
            .unwrap()
            .is_empty());
        assert!(repository
            .get_subprocesses_for_process_instance("pi-3")
            .await
            .unwrap()
            .is_empty());
        assert!(repository
            .get_by_process_model_hash("unknown")
            .await
            .unwrap()
            .is_empty());
        assert!(repository
            .get_by_process_model_hashes(&[])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lookup_by_hashes() {
        let repository = seeded().await;

        let by_hash = repository.get_by_process_model_hash("h1").await.unwrap();
        let ids: Vec<_> = by_hash
            .iter()
            .map(|c| c.process_instance_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["pi-1", "pi-3"]);

        let by_hashes = repository
            .get_by_process_model_hashes(&["h2".to_string(), "h1".to_string()])
            .await
            .unwrap();
        assert_eq!(by_hashes.len(), 3);
    }

    #[tokio::test]
    async fn test_get_by_process_model_id_ordered() {
        let repository = seeded().await;

        let correlations = repository.get_by_process_model_id("model-a").await.unwrap();
        let ids: Vec<_> = correlations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["corr-1", "corr-2"]);
        assert!(correlations[0].created_at <= correlations[1].created_at);
    }

    #[tokio::test]
    async fn test_finish() {
        let repository = seeded().await;

        repository
            .finish_process_instance_in_correlation("corr-1", "pi-1")
            .await
            .unwrap();

        let correlation = repository.get_by_process_instance_id("pi-1").await.unwrap();
        assert_eq!(correlation.state, CorrelationState::Finished);
        assert_eq!(correlation.error, None);
        assert!(correlation.updated_at >= correlation.created_at);

        let finished = repository
            .get_correlations_by_state(CorrelationState::Finished)
            .await
            .unwrap();
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_with_error() {
        let repository = seeded().await;
        let error = ProcessError::internal("task failed");

        repository
            .finish_process_instance_in_correlation_with_error(
                "corr-1",
                "pi-2",
                error.clone().into(),
            )
            .await
            .unwrap();

        let correlation = repository.get_by_process_instance_id("pi-2").await.unwrap();
        assert_eq!(correlation.state, CorrelationState::Error);
        assert_eq!(correlation.error, Some(ErrorPayload::Structured(error)));
    }

    /// Writes `class|message` instead of JSON
    struct PipeSerializer;

    impl ErrorSerializer for PipeSerializer {
        fn serialize(&self, error: &ProcessError) -> std::result::Result<String, CodecError> {
            Ok(format!("{}|{}", error.class, error.message))
        }

        fn deserialize(&self, text: &str) -> std::result::Result<ProcessError, CodecError> {
            let (class, message) = text
                .split_once('|')
                .ok_or_else(|| <serde_json::Error as serde::de::Error>::custom("no separator"))?;
            let class: ErrorClass = serde_json::from_value(serde_json::json!(class))?;
            Ok(ProcessError::new(class, message))
        }
    }

    #[tokio::test]
    async fn test_custom_error_codec() {
        let repository =
            InMemoryCorrelationRepository::with_codec(ErrorCodec::new(Arc::new(PipeSerializer)));
        repository
            .create_entry(None, "corr-1", "pi-1", "model-a", "h1", None)
            .await
            .unwrap();
        let error = ProcessError::new(ErrorClass::Forbidden, "no access");

        repository
            .finish_process_instance_in_correlation_with_error(
                "corr-1",
                "pi-1",
                error.clone().into(),
            )
            .await
            .unwrap();

        assert_eq!(
            repository.records()[0].error.as_deref(),
            Some("ForbiddenError|no access")
        );
        let correlation = repository.get_by_process_instance_id("pi-1").await.unwrap();
        assert_eq!(correlation.error, Some(ErrorPayload::Structured(error)));
    }

    #[tokio::test]
    async fn test_finish_unknown_pair_leaves_storage_unchanged() {
        let repository = seeded().await;
        let before = repository.records();

        let err = repository
            .finish_process_instance_in_correlation("corr-2", "pi-1")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(repository.records(), before);
    }

    #[tokio::test]
    async fn test_finish_terminal_record_rejected() {
        let repository = seeded().await;
        repository
            .finish_process_instance_in_correlation("corr-1", "pi-1")
            .await
            .unwrap();
        let before = repository.records();

        let err = repository
            .finish_process_instance_in_correlation_with_error("corr-1", "pi-1", "late".into())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CorrelationError::InvalidStateTransition {
                from: CorrelationState::Finished,
                to: CorrelationState::Error,
            }
        ));
        assert_eq!(repository.records(), before);
    }

    #[tokio::test]
    async fn test_delete_by_process_model_id() {
        let repository = seeded().await;

        repository
            .delete_correlation_by_process_model_id("model-a")
            .await
            .unwrap();

        let remaining = repository.get_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].process_model_id.as_deref(), Some("model-b"));
    }
}
