//! The Coordinator ties the registry, the round engine, history and the
//! transport-facing connection table together.
//!
//! Locking: the registry lock is always taken before the rounds lock, and
//! neither is held across persistence or socket I/O. Completed rounds are
//! copied out under the locks and then persisted and broadcast, strictly in
//! round order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use flc_aggregation::{AggregationEngine, CompletedRound, RoundScheduler, SchedulerStats, TriggerSource};
use flc_protocol::*;
use flc_state::{ClientRegistry, ClientSession, HistoryStore, ReputationPolicy, StateError};

use crate::config::{CoordinatorConfig, FederationConfig};
use crate::liveness::LivenessMonitor;

/// Capacity of the event channel feeding the status stream.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Round state guarded by a single lock: the engine is the only writer of
/// the round number and buffer, the scheduler only counts triggers.
struct RoundState {
    engine: AggregationEngine,
    scheduler: RoundScheduler,
}

/// Why a session was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// No inbound message within the liveness timeout.
    Inactive,
    /// The client sent `disconnect`.
    Disconnected,
    /// The transport connection bound to the session closed.
    ConnectionClosed,
    /// A broadcast could not be queued for the client.
    BroadcastFailed,
}

/// Events published to status stream subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    AggregationComplete(AggregationCompleteParams),
    ClientRegistered { client_id: String, resumed: bool },
    ClientEvicted { client_id: String, reason: EvictionReason },
}

/// Response to one client message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: ServerMessage,
    /// Close the connection after sending `message`.
    pub close: bool,
}

impl Reply {
    fn respond(message: ServerMessage) -> Self {
        Self {
            message,
            close: false,
        }
    }
}

/// Point-in-time view for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    /// Round new submissions must be tagged with.
    pub current_round: u64,
    pub completed_rounds: u64,
    /// Submissions waiting in the current round's buffer.
    pub buffered_submissions: usize,
    pub buffered_clients: Vec<String>,
    pub live_clients: usize,
    pub min_clients: usize,
    pub max_clients: usize,
    pub round_timeout_secs: u64,
    pub liveness_timeout_secs: u64,
    pub round_started_at: DateTime<Utc>,
    pub round_deadline: DateTime<Utc>,
    pub aggregation_method: String,
    pub scheduler: SchedulerStats,
    /// Rounds broadcast without being written to history.
    pub persistence_failures: u64,
    pub uptime_secs: i64,
}

/// One federated learning coordination instance.
pub struct Coordinator {
    federation: FederationConfig,
    /// Sole owner of session state. Locked before `rounds`.
    registry: RwLock<ClientRegistry>,
    rounds: Mutex<RoundState>,
    /// Durable round history, only touched from blocking tasks.
    store: Arc<dyn HistoryStore>,
    /// Adjusts reputation after each completed round.
    policy: Arc<dyn ReputationPolicy>,
    /// Outbound queues of open transport connections.
    connections: RwLock<HashMap<Uuid, mpsc::Sender<ServerMessage>>>,
    /// Feeds status stream subscribers; sends with no subscriber are dropped.
    events: broadcast::Sender<CoordinatorEvent>,
    /// Highest round whose persistence and broadcast have finished.
    finished_round: watch::Sender<u64>,
    started_at: DateTime<Utc>,
    persistence_failures: AtomicU64,
}

impl Coordinator {
    /// Build a coordinator. Round numbering continues after the most recent
    /// round already in `store`.
    pub fn new(
        config: &CoordinatorConfig,
        store: Arc<dyn HistoryStore>,
        policy: Arc<dyn ReputationPolicy>,
    ) -> Result<Self, FederationError> {
        let federation = config.federation.clone();
        let completed = store
            .query_history(1)?
            .first()
            .map(|r| r.round_number)
            .unwrap_or(0);
        if completed > 0 {
            tracing::info!(completed_rounds = completed, "Resuming round numbering from history");
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (finished_round, _) = watch::channel(completed);
        Ok(Self {
            registry: RwLock::new(ClientRegistry::new(federation.max_clients)),
            rounds: Mutex::new(RoundState {
                engine: AggregationEngine::resume_after(federation.min_clients, completed),
                scheduler: RoundScheduler::new(federation.round_timeout()),
            }),
            federation,
            store,
            policy,
            connections: RwLock::new(HashMap::new()),
            events,
            finished_round,
            started_at: Utc::now(),
            persistence_failures: AtomicU64::new(0),
        })
    }

    /// Spawn the liveness monitor and the round timer.
    pub fn start(self: &Arc<Self>) -> CoordinatorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = LivenessMonitor::new(
            Arc::clone(self),
            self.federation.liveness_check_interval(),
        );
        let liveness = tokio::spawn(monitor.run(shutdown_rx.clone()));
        let round_timer = tokio::spawn(Arc::clone(self).run_round_timer(shutdown_rx));

        tracing::info!(
            min_clients = self.federation.min_clients,
            max_clients = self.federation.max_clients,
            round_timeout_secs = self.federation.round_timeout_secs,
            "Coordinator started"
        );

        CoordinatorHandle {
            shutdown: shutdown_tx,
            tasks: vec![liveness, round_timer],
        }
    }

    pub fn federation(&self) -> &FederationConfig {
        &self.federation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    // ── Transport connections ──

    /// Register an open connection's outbound queue.
    pub async fn attach(&self, outbound: mpsc::Sender<ServerMessage>) -> Uuid {
        let connection_id = Uuid::new_v4();
        self.connections.write().await.insert(connection_id, outbound);
        tracing::debug!(%connection_id, "Connection attached");
        connection_id
    }

    /// Forget a closed connection. The session bound to it, if still bound,
    /// is removed as an implicit disconnect.
    pub async fn detach(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);

        let bound: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .live_connections()
                .into_iter()
                .filter(|(_, conn)| *conn == connection_id)
                .map(|(id, _)| id)
                .collect()
        };

        for client_id in bound {
            let removed = {
                let mut registry = self.registry.write().await;
                let mut rounds = self.rounds.lock().await;
                let removed = registry.remove_if_bound(&client_id, connection_id).is_some();
                if removed {
                    rounds.engine.purge(&client_id);
                }
                removed
            };
            if removed {
                self.publish_eviction(&client_id, EvictionReason::ConnectionClosed);
            }
        }
        tracing::debug!(%connection_id, "Connection detached");
    }

    // ── Message dispatch ──

    /// Handle one client message arriving on `connection_id`.
    pub async fn handle_message(&self, connection_id: Option<Uuid>, message: ClientMessage) -> Reply {
        tracing::debug!(client_id = %message.client_id(), "Inbound message");
        match message {
            ClientMessage::Register(params) => self.handle_register(params, connection_id).await,
            ClientMessage::Submit(params) => self.handle_submit(params).await,
            ClientMessage::Heartbeat(params) => self.handle_heartbeat(params).await,
            ClientMessage::Evaluation(params) => self.handle_evaluation(params).await,
            ClientMessage::Disconnect(params) => self.handle_disconnect(params).await,
        }
    }

    async fn handle_register(&self, params: RegisterParams, connection_id: Option<Uuid>) -> Reply {
        let outcome = {
            let mut registry = self.registry.write().await;
            registry.register(&params.client_id, params.capabilities, connection_id)
        };

        match outcome {
            Ok(handle) => {
                let current_round = self.current_round().await;
                let _ = self.events.send(CoordinatorEvent::ClientRegistered {
                    client_id: handle.client_id.clone(),
                    resumed: handle.resumed,
                });
                Reply::respond(ServerMessage::RegisterAck(RegisterAck::accepted(
                    self.server_config_info(current_round),
                    handle.resumed,
                )))
            }
            Err(err) => {
                tracing::warn!(client_id = %params.client_id, error = %err, "Registration rejected");
                Reply {
                    message: ServerMessage::RegisterAck(RegisterAck::rejected(&err)),
                    close: matches!(err, FederationError::CapacityExceeded { .. }),
                }
            }
        }
    }

    async fn handle_submit(&self, params: SubmitParams) -> Reply {
        // Rejected submissions still count as activity for a live session.
        let _ = self.registry.write().await.touch(&params.client_id);

        let submission = match Submission::from_params(&params) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(client_id = %params.client_id, error = %err, "Submission rejected");
                let current_round = self.current_round().await;
                return Reply::respond(ServerMessage::SubmitAck(SubmitAck::rejected(&err, current_round)));
            }
        };

        let (outcome, completed, current_round) = {
            let mut registry = self.registry.write().await;
            let mut rounds = self.rounds.lock().await;
            let RoundState { engine, scheduler } = &mut *rounds;

            let outcome = engine.accept(submission, &mut registry);
            let completed = if outcome.is_ok() {
                scheduler.fire(engine, TriggerSource::Quorum)
            } else {
                None
            };
            (outcome, completed, engine.current_round())
        };

        if let Some(round) = completed {
            self.complete_round(round).await;
        }

        match outcome {
            Ok(accepted) => Reply::respond(ServerMessage::SubmitAck(SubmitAck::accepted(
                current_round,
                accepted.privacy_budget,
            ))),
            Err(err) => {
                // Stale submissions are already logged by the engine.
                if !matches!(err, FederationError::StaleRound { .. }) {
                    tracing::warn!(client_id = %params.client_id, error = %err, "Submission rejected");
                }
                Reply::respond(ServerMessage::SubmitAck(SubmitAck::rejected(&err, current_round)))
            }
        }
    }

    async fn handle_heartbeat(&self, params: HeartbeatParams) -> Reply {
        let touched = self.registry.write().await.touch(&params.client_id);
        let ack = match touched {
            Ok(()) => Ack::ok(self.current_round().await),
            Err(err) => Ack::rejected(&err),
        };
        Reply::respond(ServerMessage::HeartbeatAck(ack))
    }

    async fn handle_evaluation(&self, params: EvaluationParams) -> Reply {
        if !params.accuracy.is_finite() || !(0.0..=1.0).contains(&params.accuracy) {
            let err = FederationError::InvalidMetrics(format!(
                "accuracy {} outside [0, 1]",
                params.accuracy
            ));
            return Reply::respond(ServerMessage::EvaluationAck(Ack::rejected(&err)));
        }

        let recorded = self
            .registry
            .write()
            .await
            .record_evaluation(&params.client_id, params.accuracy);
        let ack = match recorded {
            Ok(()) => {
                tracing::info!(
                    client_id = %params.client_id,
                    accuracy = params.accuracy,
                    data_size = params.data_size,
                    "Global model evaluation reported"
                );
                Ack::ok(self.current_round().await)
            }
            Err(err) => Ack::rejected(&err),
        };
        Reply::respond(ServerMessage::EvaluationAck(ack))
    }

    async fn handle_disconnect(&self, params: DisconnectParams) -> Reply {
        self.evict(&params.client_id, EvictionReason::Disconnected).await;
        Reply::respond(ServerMessage::DisconnectAck(Ack::ok(self.current_round().await)))
    }

    // ── Eviction ──

    /// Remove a session and purge its buffered submission. Returns true if
    /// the session existed.
    pub async fn evict(&self, client_id: &str, reason: EvictionReason) -> bool {
        let removed = {
            let mut registry = self.registry.write().await;
            let mut rounds = self.rounds.lock().await;
            let removed = registry.remove(client_id).is_some();
            rounds.engine.purge(client_id);
            removed
        };
        if removed {
            self.publish_eviction(client_id, reason);
        }
        removed
    }

    /// Evict every session idle for longer than the liveness timeout as of `now`.
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let evicted = {
            let mut registry = self.registry.write().await;
            let mut rounds = self.rounds.lock().await;
            let stale = registry.stale_clients(now, self.federation.liveness_timeout());
            for client_id in &stale {
                registry.remove(client_id);
                rounds.engine.purge(client_id);
            }
            stale
        };
        for client_id in &evicted {
            self.publish_eviction(client_id, EvictionReason::Inactive);
        }
        evicted
    }

    fn publish_eviction(&self, client_id: &str, reason: EvictionReason) {
        tracing::info!(client_id = %client_id, ?reason, "Client evicted");
        let _ = self.events.send(CoordinatorEvent::ClientEvicted {
            client_id: client_id.to_string(),
            reason,
        });
    }

    // ── Rounds ──

    pub async fn current_round(&self) -> u64 {
        self.rounds.lock().await.engine.current_round()
    }

    /// Fire the round timer once. Returns the completed round, if any.
    pub async fn trigger_timeout(&self) -> Option<RoundResult> {
        let completed = {
            let mut rounds = self.rounds.lock().await;
            let RoundState { engine, scheduler } = &mut *rounds;
            scheduler.fire(engine, TriggerSource::Timeout)
        }?;
        let result = completed.result.clone();
        self.complete_round(completed).await;
        Some(result)
    }

    async fn run_round_timer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.federation.round_timeout();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.trigger_timeout().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Round timer stopped");
    }

    /// Post-aggregation work, run without any lock held: reputation policy,
    /// persistence, broadcast. Waits until the previous round has finished so
    /// history and clients see rounds in order.
    async fn complete_round(&self, round: CompletedRound) {
        let round_number = round.result.round_number;
        let _turn = FinishedRound {
            finished: &self.finished_round,
            round_number,
        };
        let mut finished = self.finished_round.subscribe();
        let _ = finished
            .wait_for(|done| done.saturating_add(1) >= round_number)
            .await;

        self.apply_reputation_policy(&round.contributions).await;

        let store = Arc::clone(&self.store);
        let result = round.result.clone();
        let contributions = round.contributions;
        let persisted =
            tokio::task::spawn_blocking(move || store.save_round(&result, &contributions)).await;

        match persisted {
            Ok(Ok(())) => {
                tracing::debug!(round = round.result.round_number, "Round persisted");
            }
            Ok(Err(e)) => self.record_persistence_failure(round.result.round_number, &e.to_string()),
            Err(e) => self.record_persistence_failure(round.result.round_number, &e.to_string()),
        }

        self.broadcast_round(&round.result).await;
    }

    fn record_persistence_failure(&self, round_number: u64, error: &str) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(round = round_number, error = %error, "Failed to persist round history");
    }

    async fn apply_reputation_policy(&self, contributions: &[ParticipationRecord]) {
        let mut registry = self.registry.write().await;
        for record in contributions {
            let Some(session) = registry.get(&record.client_id) else {
                continue;
            };
            if let Some(score) = self.policy.adjust(session, record) {
                let _ = registry.set_reputation(&record.client_id, score);
            }
        }
    }

    /// Queue `aggregation_complete` for every live, connected session.
    /// Sessions whose queue is full or closed are evicted.
    async fn broadcast_round(&self, result: &RoundResult) {
        let params = AggregationCompleteParams::from(result);
        let message = ServerMessage::AggregationComplete(params.clone());
        let targets = self.registry.read().await.live_connections();

        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (client_id, connection_id) in &targets {
                let delivered = connections
                    .get(connection_id)
                    .map(|tx| tx.try_send(message.clone()).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    failed.push(client_id.clone());
                }
            }
        }

        tracing::info!(
            round = result.round_number,
            recipients = targets.len() - failed.len(),
            failed = failed.len(),
            "Broadcast aggregation result"
        );

        for client_id in failed {
            tracing::warn!(client_id = %client_id, round = result.round_number, "Broadcast delivery failed");
            self.evict(&client_id, EvictionReason::BroadcastFailed).await;
        }

        let _ = self.events.send(CoordinatorEvent::AggregationComplete(params));
    }

    // ── Snapshots ──

    fn server_config_info(&self, current_round: u64) -> ServerConfigInfo {
        ServerConfigInfo {
            min_clients: self.federation.min_clients,
            round_timeout_secs: self.federation.round_timeout_secs,
            current_round,
            aggregation_method: AGGREGATION_METHOD.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let live_clients = self.registry.read().await.len();
        let rounds = self.rounds.lock().await;
        let engine = &rounds.engine;
        CoordinatorStatus {
            current_round: engine.current_round(),
            completed_rounds: engine.completed_rounds(),
            buffered_submissions: engine.buffered_count(),
            buffered_clients: engine.buffered_clients(),
            live_clients,
            min_clients: self.federation.min_clients,
            max_clients: self.federation.max_clients,
            round_timeout_secs: self.federation.round_timeout_secs,
            liveness_timeout_secs: self.federation.liveness_timeout_secs,
            round_started_at: engine.round_started_at(),
            round_deadline: rounds.scheduler.round_deadline(engine),
            aggregation_method: AGGREGATION_METHOD.to_string(),
            scheduler: rounds.scheduler.stats(),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }

    pub async fn clients(&self) -> Vec<ClientSession> {
        self.registry.read().await.snapshot()
    }

    pub async fn client(&self, client_id: &str) -> Option<ClientSession> {
        self.registry.read().await.get(client_id).cloned()
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<RoundResult>, FederationError> {
        self.with_store(move |store| store.query_history(limit)).await
    }

    pub async fn history_summary(&self) -> Result<HistorySummary, FederationError> {
        self.with_store(|store| store.summary()).await
    }

    pub async fn client_participation(
        &self,
        client_id: &str,
        limit: usize,
    ) -> Result<Vec<ParticipationRecord>, FederationError> {
        let client_id = client_id.to_string();
        self.with_store(move |store| store.client_participation(&client_id, limit))
            .await
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, FederationError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HistoryStore) -> Result<T, StateError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| FederationError::PersistenceFailure(e.to_string()))?
            .map_err(FederationError::from)
    }
}

/// Marks a round finished when dropped, including when the completing task
/// is cancelled part way, so later rounds never wait forever.
struct FinishedRound<'a> {
    finished: &'a watch::Sender<u64>,
    round_number: u64,
}

impl Drop for FinishedRound<'_> {
    fn drop(&mut self) {
        let round_number = self.round_number;
        self.finished.send_modify(|done| *done = (*done).max(round_number));
    }
}

/// Owns the background tasks started by [`Coordinator::start`].
pub struct CoordinatorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// A receiver that changes when [`CoordinatorHandle::stop`] is called,
    /// for servers that should stop alongside the coordinator.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal shutdown and wait for the background tasks to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Coordinator task ended abnormally");
            }
        }
        tracing::info!("Coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flc_state::{NoopReputationPolicy, SqliteHistoryStore};

    fn coordinator(min_clients: usize, max_clients: usize) -> Coordinator {
        let mut config = CoordinatorConfig::default();
        config.federation.min_clients = min_clients;
        config.federation.max_clients = max_clients;
        Coordinator::new(
            &config,
            Arc::new(SqliteHistoryStore::in_memory().unwrap()),
            Arc::new(NoopReputationPolicy),
        )
        .unwrap()
    }

    fn register(id: &str) -> ClientMessage {
        ClientMessage::Register(RegisterParams {
            client_id: id.to_string(),
            capabilities: ClientCapabilities::default(),
        })
    }

    #[tokio::test]
    async fn test_register_ack_carries_server_config() {
        let c = coordinator(2, 10);
        let reply = c.handle_message(None, register("lab-1")).await;
        assert!(!reply.close);
        match reply.message {
            ServerMessage::RegisterAck(ack) => {
                assert!(ack.accepted);
                assert!(!ack.resumed);
                let cfg = ack.server_config.unwrap();
                assert_eq!(cfg.current_round, 1);
                assert_eq!(cfg.min_clients, 2);
                assert_eq!(cfg.aggregation_method, "fedavg_weighted");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capacity_rejection_closes_connection() {
        let c = coordinator(1, 1);
        c.handle_message(None, register("a")).await;
        let reply = c.handle_message(None, register("b")).await;
        assert!(reply.close);
        match reply.message {
            ServerMessage::RegisterAck(ack) => {
                assert!(!ack.accepted);
                assert_eq!(ack.code.as_deref(), Some("capacity_exceeded"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(c.clients().await.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_client() {
        let c = coordinator(2, 10);
        let reply = c
            .handle_message(
                None,
                ClientMessage::Heartbeat(HeartbeatParams {
                    client_id: "ghost".into(),
                }),
            )
            .await;
        match reply.message {
            ServerMessage::HeartbeatAck(ack) => {
                assert!(!ack.ack);
                assert_eq!(ack.code.as_deref(), Some("unknown_client"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_evaluation_recorded() {
        let c = coordinator(2, 10);
        c.handle_message(None, register("a")).await;
        let reply = c
            .handle_message(
                None,
                ClientMessage::Evaluation(EvaluationParams {
                    client_id: "a".into(),
                    accuracy: 0.83,
                    data_size: 40,
                }),
            )
            .await;
        assert!(matches!(reply.message, ServerMessage::EvaluationAck(Ack { ack: true, .. })));
        assert_eq!(c.client("a").await.unwrap().last_evaluation, Some(0.83));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let c = coordinator(2, 10);
        c.handle_message(None, register("a")).await;
        for _ in 0..2 {
            let reply = c
                .handle_message(
                    None,
                    ClientMessage::Disconnect(DisconnectParams {
                        client_id: "a".into(),
                    }),
                )
                .await;
            assert!(matches!(reply.message, ServerMessage::DisconnectAck(Ack { ack: true, .. })));
        }
        assert!(c.client("a").await.is_none());
    }

    #[tokio::test]
    async fn test_detach_only_removes_bound_session() {
        let c = coordinator(2, 10);
        let (tx_old, _rx_old) = mpsc::channel(4);
        let (tx_new, _rx_new) = mpsc::channel(4);
        let old = c.attach(tx_old).await;
        let new = c.attach(tx_new).await;

        c.handle_message(Some(old), register("a")).await;
        c.handle_message(Some(new), register("a")).await;

        c.detach(old).await;
        assert!(c.client("a").await.is_some());
        c.detach(new).await;
        assert!(c.client("a").await.is_none());
    }
}
