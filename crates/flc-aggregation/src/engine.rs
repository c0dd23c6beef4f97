//! Weighted federated averaging over per-client summary metrics.
//!
//! The engine owns the in-progress round: its number and the buffer of
//! submissions keyed by client id (last submission wins). Aggregation:
//! 1. Weight each submission: `clamp(0.1, 2.0, data_size/100 * (1 + max(0, acc-0.5)*2) * reputation)`
//! 2. `global_accuracy = Σ(acc_i * w_i) / Σ(w_i)`
//! 3. `convergence = clamp(0, 1, 1 - stddev(acc) / mean(acc))`
//! 4. Clear the buffer and open the next round
//!
//! Model payloads are carried but never read.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use flc_protocol::{FederationError, ParticipationRecord, RoundResult, Submission};
use flc_state::{contribution_weight, ClientRegistry};

/// A buffered submission and the reputation its author had when it arrived.
#[derive(Debug, Clone)]
pub struct BufferedSubmission {
    pub submission: Submission,
    pub reputation: f64,
}

/// Outcome of a successful [`AggregationEngine::accept`].
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub client_id: String,
    pub round_number: u64,
    /// An earlier submission from the same client in this round was overwritten.
    pub replaced: bool,
    pub privacy_budget: f64,
    pub buffered: usize,
}

/// A round that was aggregated, with the rows to persist.
#[derive(Debug, Clone)]
pub struct CompletedRound {
    pub result: RoundResult,
    pub contributions: Vec<ParticipationRecord>,
}

#[derive(Debug, Clone)]
pub enum AggregationOutcome {
    Completed(CompletedRound),
    /// Below quorum. Nothing was consumed; `result` is flagged
    /// `insufficient_data` and reports a global accuracy of 0.
    InsufficientQuorum {
        result: RoundResult,
        buffered: usize,
        required: usize,
    },
}

impl AggregationOutcome {
    pub fn completed(self) -> Option<CompletedRound> {
        match self {
            Self::Completed(c) => Some(c),
            Self::InsufficientQuorum { .. } => None,
        }
    }

    /// The deferred state as an error value, for callers that report it.
    pub fn quorum_error(&self) -> Option<FederationError> {
        match self {
            Self::Completed(_) => None,
            Self::InsufficientQuorum { buffered, required, .. } => {
                Some(FederationError::InsufficientQuorum {
                    buffered: *buffered,
                    required: *required,
                })
            }
        }
    }
}

/// Collects submissions for the open round and aggregates them.
///
/// Lifecycle of a round:
/// 1. `accept()` - buffer submissions tagged with `current_round()`
/// 2. `should_trigger()` - quorum check
/// 3. `aggregate()` - produce the `RoundResult`, open the next round
pub struct AggregationEngine {
    min_clients: usize,
    /// Rounds aggregated so far; the open round is `completed_rounds + 1`.
    completed_rounds: u64,
    round_started_at: DateTime<Utc>,
    buffer: BTreeMap<String, BufferedSubmission>,
}

impl AggregationEngine {
    pub fn new(min_clients: usize) -> Self {
        Self {
            min_clients,
            completed_rounds: 0,
            round_started_at: Utc::now(),
            buffer: BTreeMap::new(),
        }
    }

    /// Resume numbering after `completed_rounds` rounds already in history.
    pub fn resume_after(min_clients: usize, completed_rounds: u64) -> Self {
        Self {
            completed_rounds,
            ..Self::new(min_clients)
        }
    }

    /// The round currently accepting submissions.
    pub fn current_round(&self) -> u64 {
        self.completed_rounds + 1
    }

    pub fn completed_rounds(&self) -> u64 {
        self.completed_rounds
    }

    pub fn min_clients(&self) -> usize {
        self.min_clients
    }

    pub fn round_started_at(&self) -> DateTime<Utc> {
        self.round_started_at
    }

    pub fn buffered_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered_clients(&self) -> Vec<String> {
        self.buffer.keys().cloned().collect()
    }

    pub fn is_buffered(&self, client_id: &str) -> bool {
        self.buffer.contains_key(client_id)
    }

    /// Buffer a submission for the current round.
    ///
    /// Rejects unknown clients and submissions tagged with any other round.
    /// On acceptance the client's privacy budget and contribution count are
    /// updated through the registry.
    pub fn accept(
        &mut self,
        submission: Submission,
        registry: &mut ClientRegistry,
    ) -> Result<Accepted, FederationError> {
        let client_id = submission.client_id.clone();
        let reputation = registry
            .get(&client_id)
            .map(|s| s.reputation_score)
            .ok_or_else(|| FederationError::UnknownClient(client_id.clone()))?;

        let current = self.current_round();
        if submission.round_number < current {
            tracing::info!(
                client_id = %client_id,
                submitted = submission.round_number,
                current,
                "Dropping stale submission"
            );
            return Err(FederationError::StaleRound {
                submitted: submission.round_number,
                current,
            });
        }
        if submission.round_number > current {
            return Err(FederationError::FutureRound {
                submitted: submission.round_number,
                current,
            });
        }

        let privacy_budget = registry.record_contribution(&client_id, submission.privacy_cost)?;
        let replaced = self
            .buffer
            .insert(
                client_id.clone(),
                BufferedSubmission {
                    submission,
                    reputation,
                },
            )
            .is_some();

        tracing::debug!(
            client_id = %client_id,
            round = current,
            replaced,
            buffered = self.buffer.len(),
            quorum = self.min_clients,
            "Submission buffered"
        );

        Ok(Accepted {
            client_id,
            round_number: current,
            replaced,
            privacy_budget,
            buffered: self.buffer.len(),
        })
    }

    /// Drop a client's buffered submission. Returns true if one was present.
    pub fn purge(&mut self, client_id: &str) -> bool {
        let removed = self.buffer.remove(client_id).is_some();
        if removed {
            tracing::info!(
                client_id = %client_id,
                round = self.current_round(),
                "Purged buffered submission"
            );
        }
        removed
    }

    /// Quorum reached for the open round.
    pub fn should_trigger(&self) -> bool {
        !self.buffer.is_empty() && self.buffer.len() >= self.min_clients
    }

    /// Aggregate the open round if quorum is met.
    ///
    /// Below quorum nothing changes and no round number is consumed.
    pub fn aggregate(&mut self) -> AggregationOutcome {
        let round_number = self.current_round();
        if !self.should_trigger() {
            let now = Utc::now();
            return AggregationOutcome::InsufficientQuorum {
                result: RoundResult {
                    round_number,
                    start_time: self.round_started_at,
                    end_time: now,
                    participating_clients: 0,
                    contributors: Vec::new(),
                    global_accuracy: 0.0,
                    convergence_score: 0.0,
                    total_privacy_cost: 0.0,
                    insufficient_data: true,
                },
                buffered: self.buffer.len(),
                required: self.min_clients,
            };
        }

        let entries = std::mem::take(&mut self.buffer);
        let end_time = Utc::now();

        let mut contributions = Vec::with_capacity(entries.len());
        for (client_id, entry) in &entries {
            let s = &entry.submission;
            contributions.push(ParticipationRecord {
                round_number,
                client_id: client_id.clone(),
                local_accuracy: s.accuracy,
                data_size: s.data_size,
                contribution_weight: contribution_weight(s.data_size, s.accuracy, entry.reputation),
                privacy_cost: s.privacy_cost,
                submitted_at: s.timestamp,
            });
        }

        let accuracies: Vec<f64> = contributions.iter().map(|c| c.local_accuracy).collect();
        let weights: Vec<f64> = contributions.iter().map(|c| c.contribution_weight).collect();
        let global_accuracy = weighted_mean(&accuracies, &weights).unwrap_or(0.0);
        let convergence = convergence_score(&accuracies);
        let total_privacy_cost: f64 = contributions.iter().map(|c| c.privacy_cost).sum();

        let result = RoundResult {
            round_number,
            start_time: self.round_started_at,
            end_time,
            participating_clients: contributions.len(),
            contributors: entries.keys().cloned().collect(),
            global_accuracy,
            convergence_score: convergence,
            total_privacy_cost,
            insufficient_data: false,
        };

        self.completed_rounds += 1;
        self.round_started_at = end_time;

        tracing::info!(
            round = round_number,
            participants = result.participating_clients,
            global_accuracy = result.global_accuracy,
            convergence = result.convergence_score,
            privacy_cost = result.total_privacy_cost,
            "Round aggregated"
        );

        AggregationOutcome::Completed(CompletedRound {
            result,
            contributions,
        })
    }
}

/// `Σ(v_i * w_i) / Σ(w_i)`; `None` for empty input or zero total weight.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let sum: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    Some(sum / total)
}

/// `1 - stddev / mean` (population stddev) clamped to `[0, 1]`.
/// Zero for fewer than two samples or a zero mean.
pub fn convergence_score(accuracies: &[f64]) -> f64 {
    if accuracies.len() < 2 {
        return 0.0;
    }
    let n = accuracies.len() as f64;
    let mean = accuracies.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = accuracies.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}
