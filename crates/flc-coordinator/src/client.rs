//! Client side of the federation protocol.
//!
//! [`CoordinatorClient`] speaks the newline-delimited JSON transport: it
//! sends one request at a time and waits for its response, while
//! `aggregation_complete` broadcasts are queued separately for
//! [`CoordinatorClient::next_aggregation`]. Local training is delegated to a
//! [`Trainer`].
//!
//! Broadcasts never hold up responses: when the broadcast queue is full the
//! newest broadcast is dropped and counted in [`ClientStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use flc_protocol::*;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const INBOUND_QUEUE: usize = 64;
/// Unread `aggregation_complete` broadcasts kept before newer ones are dropped.
pub const AGGREGATION_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed by coordinator")]
    ConnectionClosed,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// A locally trained model update, ready to submit.
#[derive(Debug, Clone)]
pub struct LocalUpdate {
    /// Serialized model; only its hash is checked by the coordinator.
    pub payload: Vec<u8>,
    /// Accuracy on the local validation split, in `[0, 1]`.
    pub accuracy: f64,
    /// Number of local training samples.
    pub data_size: u64,
    pub privacy_cost: f64,
    pub training_time_secs: f64,
}

/// The training collaborator: produces one update per round.
pub trait Trainer: Send {
    fn train(&mut self, round_number: u64) -> LocalUpdate;
}

/// Deterministic stand-in for a real trainer: accuracy improves a little
/// each round around a per-client baseline, with seeded noise.
pub struct SimulatedTrainer {
    rng: StdRng,
    data_size: u64,
    base_accuracy: f64,
    improvement_per_round: f64,
    privacy_cost: f64,
}

impl SimulatedTrainer {
    pub fn new(seed: u64, data_size: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let base_accuracy = rng.gen_range(0.55..0.75);
        Self {
            rng,
            data_size,
            base_accuracy,
            improvement_per_round: 0.02,
            privacy_cost: DEFAULT_PRIVACY_COST,
        }
    }

    pub fn with_privacy_cost(mut self, privacy_cost: f64) -> Self {
        self.privacy_cost = privacy_cost;
        self
    }
}

impl Trainer for SimulatedTrainer {
    fn train(&mut self, round_number: u64) -> LocalUpdate {
        let progress = self.improvement_per_round * round_number.saturating_sub(1) as f64;
        let noise = self.rng.gen_range(-0.03..0.03);
        let accuracy = (self.base_accuracy + progress + noise).clamp(0.0, 1.0);

        let mut payload = vec![0u8; 64];
        self.rng.fill_bytes(&mut payload);

        LocalUpdate {
            payload,
            accuracy,
            data_size: self.data_size,
            privacy_cost: self.privacy_cost,
            training_time_secs: self.rng.gen_range(0.5..2.0),
        }
    }
}

/// What the client knows about its own participation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientStats {
    /// Round the next submission is tagged with.
    pub current_round: u64,
    /// Completed rounds whose contributor list included this client.
    pub rounds_contributed: u64,
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
    /// Local mirror of the coordinator's budget, floored at 0.
    pub privacy_budget_remaining: f64,
    /// Global accuracy from the most recent broadcast read.
    pub last_global_accuracy: Option<f64>,
    /// Broadcasts dropped because [`AGGREGATION_QUEUE`] unread ones were pending.
    pub broadcasts_dropped: u64,
}

pub struct CoordinatorClient {
    client_id: String,
    writer: OwnedWriteHalf,
    responses: mpsc::Receiver<ServerMessage>,
    aggregations: mpsc::Receiver<AggregationCompleteParams>,
    broadcasts_dropped: Arc<AtomicU64>,
    reader_task: JoinHandle<()>,
    request_timeout: Duration,
    /// Responses still owed for requests that timed out. The coordinator
    /// answers each line in order, so these arrive before any newer response.
    stale_responses: usize,
    stats: ClientStats,
}

impl CoordinatorClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A, client_id: impl Into<String>) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let (response_tx, responses) = mpsc::channel(INBOUND_QUEUE);
        let (aggregation_tx, aggregations) = mpsc::channel(AGGREGATION_QUEUE);
        let broadcasts_dropped = Arc::new(AtomicU64::new(0));
        let dropped = Arc::clone(&broadcasts_dropped);

        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message = match ServerMessage::from_json(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed coordinator message");
                        continue;
                    }
                };
                let delivered = match message {
                    ServerMessage::AggregationComplete(params) => {
                        match aggregation_tx.try_send(params) {
                            Ok(()) => true,
                            Err(TrySendError::Full(params)) => {
                                dropped.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(round = params.round_number, "Broadcast queue full, dropping aggregation result");
                                true
                            }
                            Err(TrySendError::Closed(_)) => false,
                        }
                    }
                    other => response_tx.send(other).await.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
        });

        Ok(Self {
            client_id: client_id.into(),
            writer,
            responses,
            aggregations,
            broadcasts_dropped,
            reader_task,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stale_responses: 0,
            stats: ClientStats {
                current_round: 1,
                privacy_budget_remaining: INITIAL_PRIVACY_BUDGET,
                ..Default::default()
            },
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            broadcasts_dropped: self.broadcasts_dropped.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }

    async fn request(&mut self, message: ClientMessage) -> Result<ServerMessage, ClientError> {
        let json = message.to_json()?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.responses.recv()).await {
                Ok(Some(response)) if self.stale_responses > 0 => {
                    self.stale_responses -= 1;
                    tracing::debug!(?response, "Discarding late response to a timed out request");
                }
                Ok(Some(response)) => return Ok(response),
                Ok(None) => return Err(ClientError::ConnectionClosed),
                Err(_) => {
                    self.stale_responses += 1;
                    return Err(ClientError::Timeout(self.request_timeout));
                }
            }
        }
    }

    pub async fn register(&mut self, capabilities: ClientCapabilities) -> Result<RegisterAck, ClientError> {
        let response = self
            .request(ClientMessage::Register(RegisterParams {
                client_id: self.client_id.clone(),
                capabilities,
            }))
            .await?;
        match response {
            ServerMessage::RegisterAck(ack) => {
                if let Some(cfg) = &ack.server_config {
                    self.stats.current_round = cfg.current_round;
                }
                Ok(ack)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Submit an update tagged with the current round.
    pub async fn submit(&mut self, update: &LocalUpdate) -> Result<SubmitAck, ClientError> {
        let payload = ModelPayload::new(update.payload.clone());
        let params = SubmitParams::new(
            self.client_id.clone(),
            self.stats.current_round,
            &payload,
            TrainingMetrics {
                accuracy: update.accuracy,
                data_size: update.data_size,
                privacy_cost: update.privacy_cost,
                training_time_secs: Some(update.training_time_secs),
            },
        );
        match self.request(ClientMessage::Submit(params)).await? {
            ServerMessage::SubmitAck(ack) => {
                if ack.accepted {
                    self.stats.submissions_accepted += 1;
                    self.stats.privacy_budget_remaining =
                        (self.stats.privacy_budget_remaining - update.privacy_cost).max(0.0);
                } else {
                    self.stats.submissions_rejected += 1;
                }
                self.stats.current_round = ack.current_round;
                Ok(ack)
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn heartbeat(&mut self) -> Result<Ack, ClientError> {
        let message = ClientMessage::Heartbeat(HeartbeatParams {
            client_id: self.client_id.clone(),
        });
        match self.request(message).await? {
            ServerMessage::HeartbeatAck(ack) => Ok(ack),
            other => Err(unexpected(other)),
        }
    }

    /// Report how the latest global model performs on local data.
    pub async fn report_evaluation(&mut self, accuracy: f64, data_size: u64) -> Result<Ack, ClientError> {
        let message = ClientMessage::Evaluation(EvaluationParams {
            client_id: self.client_id.clone(),
            accuracy,
            data_size,
        });
        match self.request(message).await? {
            ServerMessage::EvaluationAck(ack) => Ok(ack),
            other => Err(unexpected(other)),
        }
    }

    pub async fn disconnect(mut self) -> Result<Ack, ClientError> {
        let message = ClientMessage::Disconnect(DisconnectParams {
            client_id: self.client_id.clone(),
        });
        let ack = match self.request(message).await? {
            ServerMessage::DisconnectAck(ack) => ack,
            other => return Err(unexpected(other)),
        };
        self.writer.shutdown().await?;
        self.reader_task.abort();
        Ok(ack)
    }

    /// Wait for the next `aggregation_complete` broadcast.
    ///
    /// Cancel safe: dropping the future loses no broadcast.
    pub async fn next_aggregation(&mut self) -> Result<AggregationCompleteParams, ClientError> {
        let params = self
            .aggregations
            .recv()
            .await
            .ok_or(ClientError::ConnectionClosed)?;

        self.stats.current_round = self.stats.current_round.max(params.round_number + 1);
        self.stats.last_global_accuracy = Some(params.global_accuracy);
        if params.contributors.iter().any(|c| c == &self.client_id) {
            self.stats.rounds_contributed += 1;
        }
        Ok(params)
    }
}

impl Drop for CoordinatorClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn unexpected(message: ServerMessage) -> ClientError {
    match message {
        ServerMessage::Error(e) => ClientError::UnexpectedResponse(format!("{}: {}", e.code, e.message)),
        other => ClientError::UnexpectedResponse(format!("{other:?}")),
    }
}
