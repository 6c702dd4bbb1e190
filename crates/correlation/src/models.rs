// Correlation models
//
// CorrelationRecord is the persisted row; Correlation is the decoded runtime
// object handed back to the process engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{decode_identity, ErrorCodec, ErrorPayload, Identity};
use crate::error::{CorrelationError, Result};

/// Lifecycle state of a correlation record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationState {
    /// Process instance is executing
    #[default]
    Running,

    /// Process instance finished regularly
    Finished,

    /// Process instance finished with an error
    Error,
}

impl CorrelationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// Finished and error are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only `running -> finished` and `running -> error` are allowed
    pub fn can_transition_to(&self, next: CorrelationState) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Finished) | (Self::Running, Self::Error)
        )
    }
}

impl fmt::Display for CorrelationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrelationState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "error" => Ok(Self::Error),
            other => Err(format!("Unknown correlation state: {}", other)),
        }
    }
}

/// Terminal outcome applied by a finish operation
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    Finished,
    Failed(ErrorPayload),
}

impl FinishOutcome {
    pub fn target_state(&self) -> CorrelationState {
        match self {
            Self::Finished => CorrelationState::Finished,
            Self::Failed(_) => CorrelationState::Error,
        }
    }
}

/// Input for creating a correlation entry
#[derive(Debug, Clone, Default)]
pub struct NewCorrelation {
    pub identity: Option<Identity>,
    pub correlation_id: String,
    pub process_instance_id: Option<String>,
    pub process_model_id: Option<String>,
    pub process_model_hash: String,
    pub parent_process_instance_id: Option<String>,
}

impl NewCorrelation {
    pub fn new(correlation_id: impl Into<String>, process_model_hash: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            process_model_hash: process_model_hash.into(),
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    pub fn with_process_model_id(mut self, id: impl Into<String>) -> Self {
        self.process_model_id = Some(id.into());
        self
    }

    pub fn with_parent_process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.parent_process_instance_id = Some(id.into());
        self
    }

    /// Reject entries missing a correlation id or process model hash
    pub fn validate(&self) -> Result<()> {
        if self.correlation_id.trim().is_empty() {
            return Err(CorrelationError::validation("correlation_id is required"));
        }
        if self.process_model_hash.trim().is_empty() {
            return Err(CorrelationError::validation(
                "process_model_hash is required",
            ));
        }
        Ok(())
    }
}

/// Persisted correlation row
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationRecord {
    pub id: i64,
    pub correlation_id: String,
    pub process_instance_id: Option<String>,
    pub process_model_id: Option<String>,
    pub process_model_hash: String,
    pub parent_process_instance_id: Option<String>,
    pub identity: Option<String>,
    pub state: CorrelationState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CorrelationRecord {
    /// Apply a terminal transition in place
    ///
    /// `updated_at` never moves backwards, even if the clock does.
    pub fn finish(
        &mut self,
        outcome: &FinishOutcome,
        codec: &ErrorCodec,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let target = outcome.target_state();
        if !self.state.can_transition_to(target) {
            return Err(CorrelationError::InvalidStateTransition {
                from: self.state,
                to: target,
            });
        }

        self.state = target;
        self.error = match outcome {
            FinishOutcome::Finished => None,
            FinishOutcome::Failed(payload) => Some(codec.encode(payload)),
        };
        self.updated_at = now.max(self.updated_at);
        Ok(())
    }

    /// Decode into the runtime object used by the process engine
    pub fn into_correlation(self, codec: &ErrorCodec) -> Correlation {
        let identity = decode_identity(self.identity.as_deref());
        let error = self.error.as_deref().map(|text| codec.decode(text));

        Correlation {
            id: self.correlation_id,
            process_instance_id: self.process_instance_id,
            process_model_id: self.process_model_id,
            process_model_hash: self.process_model_hash,
            parent_process_instance_id: self.parent_process_instance_id,
            identity,
            state: self.state,
            error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Correlation as returned by the repository
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    /// The correlation id
    pub id: String,
    pub process_instance_id: Option<String>,
    pub process_model_id: Option<String>,
    pub process_model_hash: String,
    pub parent_process_instance_id: Option<String>,
    pub identity: Option<Identity>,
    pub state: CorrelationState,
    pub error: Option<ErrorPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
