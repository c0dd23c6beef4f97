//! Round triggering: quorum after a submission, or the periodic round timer.
//!
//! Both triggers funnel through [`RoundScheduler::fire`], which the caller
//! invokes while holding exclusive access to the engine. A trigger that finds
//! the round already aggregated (empty buffer) is a no-op, so racing triggers
//! produce at most one `RoundResult` per round.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{AggregationEngine, AggregationOutcome, CompletedRound};

/// What caused an aggregation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A submission brought the buffer to `min_clients`.
    Quorum,
    /// The round timer elapsed.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Aggregate(TriggerSource),
    /// Submissions are buffered but below quorum; keep waiting.
    Defer { buffered: usize, required: usize },
    /// Nothing buffered.
    Idle,
}

/// Counters exposed on the status API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub quorum_triggers: u64,
    pub timeout_triggers: u64,
    /// Timer ticks that found some submissions but no quorum.
    pub deferred_timeouts: u64,
}

pub struct RoundScheduler {
    round_timeout: Duration,
    stats: SchedulerStats,
}

impl RoundScheduler {
    pub fn new(round_timeout: Duration) -> Self {
        Self {
            round_timeout,
            stats: SchedulerStats::default(),
        }
    }

    pub fn round_timeout(&self) -> Duration {
        self.round_timeout
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// When the open round's timer is due, measured from its start.
    pub fn round_deadline(&self, engine: &AggregationEngine) -> DateTime<Utc> {
        chrono::Duration::from_std(self.round_timeout)
            .ok()
            .and_then(|t| engine.round_started_at().checked_add_signed(t))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn evaluate(&self, engine: &AggregationEngine, source: TriggerSource) -> TriggerDecision {
        if engine.buffered_count() == 0 {
            TriggerDecision::Idle
        } else if engine.should_trigger() {
            TriggerDecision::Aggregate(source)
        } else {
            TriggerDecision::Defer {
                buffered: engine.buffered_count(),
                required: engine.min_clients(),
            }
        }
    }

    /// Aggregate if the trigger condition holds. Returns the completed round.
    pub fn fire(
        &mut self,
        engine: &mut AggregationEngine,
        source: TriggerSource,
    ) -> Option<CompletedRound> {
        match self.evaluate(engine, source) {
            TriggerDecision::Aggregate(source) => match engine.aggregate() {
                AggregationOutcome::Completed(round) => {
                    match source {
                        TriggerSource::Quorum => self.stats.quorum_triggers += 1,
                        TriggerSource::Timeout => self.stats.timeout_triggers += 1,
                    }
                    tracing::debug!(
                        round = round.result.round_number,
                        ?source,
                        "Aggregation triggered"
                    );
                    Some(round)
                }
                AggregationOutcome::InsufficientQuorum { .. } => None,
            },
            TriggerDecision::Defer { buffered, required } => {
                if source == TriggerSource::Timeout {
                    self.stats.deferred_timeouts += 1;
                    tracing::info!(
                        round = engine.current_round(),
                        buffered,
                        required,
                        "Round timer elapsed below quorum, waiting"
                    );
                }
                None
            }
            TriggerDecision::Idle => None,
        }
    }
}
