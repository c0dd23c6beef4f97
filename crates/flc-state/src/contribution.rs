//! Contribution weighting and the reputation policy seam.

use flc_protocol::{
    ParticipationRecord, ACCURACY_BONUS_THRESHOLD, DATA_SIZE_WEIGHT_UNIT,
    MAX_CONTRIBUTION_WEIGHT, MIN_CONTRIBUTION_WEIGHT,
};

use crate::registry::ClientSession;

/// Influence of one submission on the weighted average.
/// - base: `data_size / 100`
/// - accuracy bonus: `max(0, accuracy - 0.5) * 2`
/// - scaled by reputation, then clamped to `[0.1, 2.0]`
pub fn contribution_weight(data_size: u64, accuracy: f64, reputation: f64) -> f64 {
    let base = data_size as f64 / DATA_SIZE_WEIGHT_UNIT;
    let accuracy_bonus = (accuracy - ACCURACY_BONUS_THRESHOLD).max(0.0) * 2.0;
    let reputation = if reputation.is_finite() { reputation.max(0.0) } else { 0.0 };
    let weight = base * (1.0 + accuracy_bonus) * reputation;
    weight.clamp(MIN_CONTRIBUTION_WEIGHT, MAX_CONTRIBUTION_WEIGHT)
}

/// External policy that may re-score a client after each completed round.
///
/// The coordinator itself never lowers reputation; whatever this returns is
/// applied through [`crate::ClientRegistry::set_reputation`].
pub trait ReputationPolicy: Send + Sync {
    /// New reputation for `session` given its participation in a round,
    /// or `None` to leave it unchanged.
    fn adjust(&self, session: &ClientSession, record: &ParticipationRecord) -> Option<f64>;
}

/// Leaves every reputation untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReputationPolicy;

impl ReputationPolicy for NoopReputationPolicy {
    fn adjust(&self, _session: &ClientSession, _record: &ParticipationRecord) -> Option<f64> {
        None
    }
}
