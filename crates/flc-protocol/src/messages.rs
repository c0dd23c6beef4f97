use serde::{Deserialize, Serialize};

use crate::error::{FederationError, ProtocolError};
use crate::types::*;

/// Every message a client may send, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register(RegisterParams),
    Submit(SubmitParams),
    Heartbeat(HeartbeatParams),
    Evaluation(EvaluationParams),
    Disconnect(DisconnectParams),
}

impl ClientMessage {
    pub fn from_json(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The client the message claims to come from.
    pub fn client_id(&self) -> &str {
        match self {
            Self::Register(p) => &p.client_id,
            Self::Submit(p) => &p.client_id,
            Self::Heartbeat(p) => &p.client_id,
            Self::Evaluation(p) => &p.client_id,
            Self::Disconnect(p) => &p.client_id,
        }
    }
}

/// Every message the coordinator sends: responses and broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterAck(RegisterAck),
    SubmitAck(SubmitAck),
    HeartbeatAck(Ack),
    EvaluationAck(Ack),
    DisconnectAck(Ack),
    AggregationComplete(AggregationCompleteParams),
    /// Unparseable request; the connection stays open.
    Error(ErrorParams),
}

impl ServerMessage {
    pub fn from_json(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Broadcasts arrive unsolicited; everything else answers a request.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::AggregationComplete(_))
    }
}

// ── Client → server payloads ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterParams {
    pub client_id: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

/// Model update. `model_payload` is base64, `model_hash` the hex SHA-256
/// of the decoded bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitParams {
    pub client_id: String,
    pub round_number: u64,
    pub model_payload: String,
    pub model_hash: String,
    pub metrics: TrainingMetrics,
}

impl SubmitParams {
    pub fn new(
        client_id: impl Into<String>,
        round_number: u64,
        payload: &ModelPayload,
        metrics: TrainingMetrics,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            round_number,
            model_payload: payload.encoded(),
            model_hash: payload.hash.clone(),
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatParams {
    pub client_id: String,
}

/// Accuracy of the global model measured on a client's local data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationParams {
    pub client_id: String,
    pub accuracy: f64,
    #[serde(default)]
    pub data_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectParams {
    pub client_id: String,
}

// ── Server → client payloads ──

/// Settings a client needs to participate, sent on successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfigInfo {
    pub min_clients: usize,
    pub round_timeout_secs: u64,
    pub current_round: u64,
    pub aggregation_method: String,
    pub protocol_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_config: Option<ServerConfigInfo>,
    /// True when an existing session with the same id was resumed.
    #[serde(default)]
    pub resumed: bool,
}

impl RegisterAck {
    pub fn accepted(server_config: ServerConfigInfo, resumed: bool) -> Self {
        Self {
            accepted: true,
            reason: None,
            code: None,
            server_config: Some(server_config),
            resumed,
        }
    }

    pub fn rejected(err: &FederationError) -> Self {
        Self {
            accepted: false,
            reason: Some(err.to_string()),
            code: Some(err.code().to_string()),
            server_config: None,
            resumed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// The coordinator's current round after handling the submission.
    pub current_round: u64,
    /// Remaining privacy budget of the submitting client, when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_budget: Option<f64>,
}

impl SubmitAck {
    pub fn accepted(current_round: u64, privacy_budget: f64) -> Self {
        Self {
            accepted: true,
            reason: None,
            code: None,
            current_round,
            privacy_budget: Some(privacy_budget),
        }
    }

    pub fn rejected(err: &FederationError, current_round: u64) -> Self {
        Self {
            accepted: false,
            reason: Some(err.to_string()),
            code: Some(err.code().to_string()),
            current_round,
            privacy_budget: None,
        }
    }
}

/// Generic acknowledgement for heartbeat, evaluation and disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u64>,
}

impl Ack {
    pub fn ok(current_round: u64) -> Self {
        Self {
            ack: true,
            reason: None,
            code: None,
            current_round: Some(current_round),
        }
    }

    pub fn rejected(err: &FederationError) -> Self {
        Self {
            ack: false,
            reason: Some(err.to_string()),
            code: Some(err.code().to_string()),
            current_round: None,
        }
    }
}

/// Broadcast sent to every live session when a round completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationCompleteParams {
    pub round_number: u64,
    pub global_accuracy: f64,
    pub convergence_score: f64,
    pub participating_clients: usize,
    pub contributors: Vec<String>,
    pub privacy_cost: f64,
}

impl From<&RoundResult> for AggregationCompleteParams {
    fn from(result: &RoundResult) -> Self {
        Self {
            round_number: result.round_number,
            global_accuracy: result.global_accuracy,
            convergence_score: result.convergence_score,
            participating_clients: result.participating_clients,
            contributors: result.contributors.clone(),
            privacy_cost: result.total_privacy_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorParams {
    pub code: String,
    pub message: String,
}
