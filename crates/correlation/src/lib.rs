//! # Correlation Repository
//!
//! Durable storage for process-engine correlations. A correlation groups one
//! top-level process instance with its nested sub-process instances; each
//! (correlation, process instance) pair is one record.
//!
//! ## Record lifecycle
//!
//! ```text
//!            create_entry
//!                 │
//!                 ▼
//!            ┌─────────┐
//!            │ running │
//!            └─────────┘
//!      finish │       │ finish_with_error
//!             ▼       ▼
//!      ┌──────────┐ ┌───────┐
//!      │ finished │ │ error │   (terminal)
//!      └──────────┘ └───────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use procengine_correlation::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let repository = InMemoryCorrelationRepository::new();
//! let identity = Identity::new("token", "user-1");
//!
//! repository
//!     .create_entry(Some(&identity), "corr-1", "pi-1", "model", "hash", None)
//!     .await?;
//! repository
//!     .finish_process_instance_in_correlation_with_error("corr-1", "pi-1", "boom".into())
//!     .await?;
//!
//! let correlation = repository.get_by_process_instance_id("pi-1").await?;
//! assert_eq!(correlation.state, CorrelationState::Error);
//! # Ok::<(), CorrelationError>(())
//! # }).unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod store;

/// Prelude for common imports
pub mod prelude {
    pub use crate::codec::{ErrorClass, ErrorPayload, Identity, ProcessError};
    pub use crate::config::StorageConfig;
    pub use crate::connection::{ConnectionProvider, PgConnectionProvider};
    pub use crate::error::{CorrelationError, Result};
    pub use crate::memory::InMemoryCorrelationRepository;
    pub use crate::models::{Correlation, CorrelationState, NewCorrelation};
    pub use crate::postgres::PostgresCorrelationRepository;
    pub use crate::store::CorrelationRepository;
}

// Re-export key types at crate root
pub use codec::{
    decode_error, decode_identity, encode_error, encode_identity, CodecError, ErrorClass,
    ErrorCodec, ErrorPayload, ErrorSerializer, Identity, JsonErrorSerializer, ProcessError,
};
pub use config::StorageConfig;
pub use connection::{ConnectionProvider, PgConnectionProvider};
pub use error::{CorrelationError, Result};
pub use memory::InMemoryCorrelationRepository;
pub use models::{Correlation, CorrelationRecord, CorrelationState, FinishOutcome, NewCorrelation};
pub use postgres::PostgresCorrelationRepository;
pub use store::CorrelationRepository;
