use serde::{Deserialize, Serialize};

/// Failures visible to federation participants and operators.
///
/// Client-facing variants are turned into structured responses carrying
/// [`FederationError::code`] and the `Display` text as the reason.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum FederationError {
    #[error("Server at capacity ({max_clients} clients)")]
    CapacityExceeded { max_clients: usize },

    #[error("Unknown client '{0}': register before sending")]
    UnknownClient(String),

    #[error("Stale round: submission for round {submitted}, current round is {current}")]
    StaleRound { submitted: u64, current: u64 },

    #[error("Round {submitted} has not opened yet, current round is {current}")]
    FutureRound { submitted: u64, current: u64 },

    #[error("Insufficient quorum: {buffered} of {required} submissions")]
    InsufficientQuorum { buffered: usize, required: usize },

    #[error("History write failed: {0}")]
    PersistenceFailure(String),

    #[error("Invalid model payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid metrics: {0}")]
    InvalidMetrics(String),
}

impl FederationError {
    /// Stable machine-readable code sent alongside the reason string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::UnknownClient(_) => "unknown_client",
            Self::StaleRound { .. } => "stale_round",
            Self::FutureRound { .. } => "future_round",
            Self::InsufficientQuorum { .. } => "insufficient_quorum",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::InvalidMetrics(_) => "invalid_metrics",
        }
    }

    /// Whether the client should re-register before retrying.
    pub fn requires_registration(&self) -> bool {
        matches!(self, Self::UnknownClient(_))
    }
}

/// Wire codec failures.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64: {0}")]
    Base64(String),
}
