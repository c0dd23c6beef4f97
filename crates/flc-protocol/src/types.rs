use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PRIVACY_COST;
use crate::error::FederationError;
use crate::integrity;

/// Capabilities a client declares at registration.
///
/// Opaque to the coordinator: stored and reported, never validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default)]
    pub data_size: u64,
    #[serde(default)]
    pub model_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_level: Option<String>,
    /// Any further keys the client sent (e.g. `computational_power`).
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Scalar metrics reported with a model update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub data_size: u64,
    #[serde(default = "default_privacy_cost")]
    pub privacy_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_time_secs: Option<f64>,
}

fn default_privacy_cost() -> f64 {
    DEFAULT_PRIVACY_COST
}

impl TrainingMetrics {
    /// Reject metrics that would poison the weighted average.
    pub fn validate(&self) -> Result<(), FederationError> {
        if !self.accuracy.is_finite() || !(0.0..=1.0).contains(&self.accuracy) {
            return Err(FederationError::InvalidMetrics(format!(
                "accuracy {} outside [0, 1]",
                self.accuracy
            )));
        }
        if !self.privacy_cost.is_finite() || self.privacy_cost < 0.0 {
            return Err(FederationError::InvalidMetrics(format!(
                "privacy_cost {} must be a non-negative number",
                self.privacy_cost
            )));
        }
        if let Some(t) = self.training_time_secs {
            if !t.is_finite() || t < 0.0 {
                return Err(FederationError::InvalidMetrics(format!(
                    "training_time_secs {t} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// Decoded model update bytes together with their verified digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPayload {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`.
    pub hash: String,
}

impl ModelPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = integrity::compute_model_hash(&bytes);
        Self { bytes, hash }
    }

    /// Decode a base64 payload and check it against the declared hash.
    pub fn decode(encoded: &str, declared_hash: &str) -> Result<Self, FederationError> {
        let bytes = integrity::decode_payload(encoded)
            .map_err(|e| FederationError::InvalidPayload(e.to_string()))?;
        if !integrity::verify_model_hash(&bytes, declared_hash) {
            return Err(FederationError::InvalidPayload(
                "model_hash does not match payload".into(),
            ));
        }
        Ok(Self::new(bytes))
    }

    pub fn encoded(&self) -> String {
        integrity::encode_payload(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One client's model update for one round.
#[derive(Debug, Clone)]
pub struct Submission {
    pub client_id: String,
    pub round_number: u64,
    pub payload: ModelPayload,
    pub accuracy: f64,
    pub data_size: u64,
    pub privacy_cost: f64,
    pub training_time_secs: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    /// Build a submission from the wire parameters, decoding the payload
    /// and validating the metrics.
    pub fn from_params(params: &crate::SubmitParams) -> Result<Self, FederationError> {
        params.metrics.validate()?;
        let payload = ModelPayload::decode(&params.model_payload, &params.model_hash)?;
        Ok(Self {
            client_id: params.client_id.clone(),
            round_number: params.round_number,
            payload,
            accuracy: params.metrics.accuracy,
            data_size: params.metrics.data_size,
            privacy_cost: params.metrics.privacy_cost,
            training_time_secs: params.metrics.training_time_secs,
            timestamp: Utc::now(),
        })
    }
}

/// Output of one aggregation cycle. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_number: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Number of submissions aggregated; equals `contributors.len()`.
    pub participating_clients: usize,
    pub contributors: Vec<String>,
    pub global_accuracy: f64,
    pub convergence_score: f64,
    pub total_privacy_cost: f64,
    /// Set when the buffer could not be aggregated; `global_accuracy` is then 0.
    #[serde(default)]
    pub insufficient_data: bool,
}

/// Per-client row recorded for a completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    pub round_number: u64,
    pub client_id: String,
    pub local_accuracy: f64,
    pub data_size: u64,
    pub contribution_weight: f64,
    pub privacy_cost: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Aggregate view over the stored round history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_rounds: u64,
    pub average_accuracy: f64,
    /// Convergence scores from oldest to newest round.
    pub convergence_trend: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(accuracy: f64, privacy_cost: f64) -> TrainingMetrics {
        TrainingMetrics {
            accuracy,
            data_size: 100,
            privacy_cost,
            training_time_secs: None,
        }
    }

    #[test]
    fn test_metrics_accept_bounds() {
        assert!(metrics(0.0, 0.0).validate().is_ok());
        assert!(metrics(1.0, 0.5).validate().is_ok());
    }

    #[test]
    fn test_metrics_reject_out_of_range() {
        assert!(matches!(
            metrics(1.2, 0.1).validate(),
            Err(FederationError::InvalidMetrics(_))
        ));
        assert!(metrics(f64::NAN, 0.1).validate().is_err());
        assert!(metrics(0.5, -0.1).validate().is_err());
    }

    #[test]
    fn test_privacy_cost_defaults_when_omitted() {
        let m: TrainingMetrics =
            serde_json::from_str(r#"{"accuracy":0.8,"data_size":10}"#).unwrap();
        assert_eq!(m.privacy_cost, DEFAULT_PRIVACY_COST);
    }

    #[test]
    fn test_payload_hash_mismatch_rejected() {
        let payload = ModelPayload::new(b"weights".to_vec());
        let wrong = integrity::compute_model_hash(b"tampered");
        assert!(matches!(
            ModelPayload::decode(&payload.encoded(), &wrong),
            Err(FederationError::InvalidPayload(_))
        ));
        let ok = ModelPayload::decode(&payload.encoded(), &payload.hash).unwrap();
        assert_eq!(ok, payload);
    }

    #[test]
    fn test_capabilities_keep_unknown_keys() {
        let caps: ClientCapabilities = serde_json::from_str(
            r#"{"data_size":120,"model_types":["random_forest"],"privacy_level":"high","computational_power":"medium"}"#,
        )
        .unwrap();
        assert_eq!(caps.data_size, 120);
        assert_eq!(caps.extra["computational_power"], "medium");
    }
}
