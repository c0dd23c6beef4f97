//! Round engine for the federated learning coordinator.
//!
//! - [`engine`]: submission buffer and weighted federated averaging
//! - [`scheduler`]: quorum and timer triggers

pub mod engine;
pub mod scheduler;

pub use engine::{
    convergence_score, weighted_mean, Accepted, AggregationEngine, AggregationOutcome,
    BufferedSubmission, CompletedRound,
};
pub use scheduler::{RoundScheduler, SchedulerStats, TriggerDecision, TriggerSource};
