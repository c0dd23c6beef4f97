/// Protocol version advertised in registration confirmations.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Name of the aggregation rule reported to clients and stored with each round.
pub const AGGREGATION_METHOD: &str = "fedavg_weighted";

/// Quorum: submissions required before a round may be aggregated.
pub const DEFAULT_MIN_CLIENTS: usize = 2;

/// Maximum number of concurrently registered sessions.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// Interval of the timeout-triggered aggregation path.
pub const DEFAULT_ROUND_TIMEOUT_SECS: u64 = 300;

/// A session not heard from for this long is evicted.
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 600;

/// How often the liveness monitor scans the registry.
pub const DEFAULT_LIVENESS_CHECK_INTERVAL_SECS: u64 = 60;

pub const INITIAL_REPUTATION: f64 = 1.0;
pub const INITIAL_PRIVACY_BUDGET: f64 = 1.0;

/// Privacy cost assumed when a client omits it from its metrics.
pub const DEFAULT_PRIVACY_COST: f64 = 0.1;

/// Contribution weights are clamped to this range so no single client dominates.
pub const MIN_CONTRIBUTION_WEIGHT: f64 = 0.1;
pub const MAX_CONTRIBUTION_WEIGHT: f64 = 2.0;

/// Data size that maps to a base weight of 1.0.
pub const DATA_SIZE_WEIGHT_UNIT: f64 = 100.0;

/// Accuracy above which a submission earns a weight bonus.
pub const ACCURACY_BONUS_THRESHOLD: f64 = 0.5;
