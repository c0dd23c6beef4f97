//! FLC State - session registry, contribution weighting and round history.

pub mod contribution;
pub mod history;
pub mod registry;

pub use contribution::{contribution_weight, NoopReputationPolicy, ReputationPolicy};
pub use history::{HistoryStore, SqliteHistoryStore};
pub use registry::{ClientRegistry, ClientSession, SessionHandle};

use flc_protocol::FederationError;

/// Errors raised by the state layer.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt history row: {0}")]
    Corrupt(String),
}

impl From<StateError> for FederationError {
    fn from(e: StateError) -> Self {
        FederationError::PersistenceFailure(e.to_string())
    }
}
