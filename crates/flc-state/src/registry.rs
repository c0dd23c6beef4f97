//! Client registry: the single owner of per-client session state.
//!
//! Other components refer to sessions by `client_id` and read snapshots;
//! every mutation goes through a method on [`ClientRegistry`].

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flc_protocol::{ClientCapabilities, FederationError, INITIAL_PRIVACY_BUDGET, INITIAL_REPUTATION};

/// One participant's connection state and local statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSession {
    pub client_id: String,
    pub capabilities: ClientCapabilities,
    /// In `[0, +inf)`. Only changed through an external reputation policy.
    pub reputation_score: f64,
    /// Decreased by each accepted submission's privacy cost, floored at 0.
    pub privacy_budget: f64,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub total_contributions: u64,
    /// Most recent global-model accuracy the client reported.
    pub last_evaluation: Option<f64>,
    /// Transport connection the session is bound to, if any.
    #[serde(skip)]
    pub connection_id: Option<Uuid>,
}

impl ClientSession {
    fn new(client_id: String, capabilities: ClientCapabilities, connection_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            capabilities,
            reputation_score: INITIAL_REPUTATION,
            privacy_budget: INITIAL_PRIVACY_BUDGET,
            last_seen: now,
            registered_at: now,
            total_contributions: 0,
            last_evaluation: None,
            connection_id,
        }
    }

    /// Time since the last inbound message, zero if `last_seen` is in the future.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_seen)
            .to_std()
            .unwrap_or_default()
    }

    pub fn privacy_budget_exhausted(&self) -> bool {
        self.privacy_budget <= 0.0
    }
}

/// Returned to the transport on successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub client_id: String,
    pub connection_id: Option<Uuid>,
    /// True when an existing session was replaced and its history kept.
    pub resumed: bool,
}

/// Owns the set of live client sessions.
pub struct ClientRegistry {
    sessions: HashMap<String, ClientSession>,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_clients,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Register or resume a session.
    ///
    /// A new id is rejected once `max_clients` sessions are live. An existing
    /// id replaces its capabilities and connection but keeps reputation,
    /// privacy budget and contribution count.
    pub fn register(
        &mut self,
        client_id: &str,
        capabilities: ClientCapabilities,
        connection_id: Option<Uuid>,
    ) -> Result<SessionHandle, FederationError> {
        if client_id.trim().is_empty() {
            return Err(FederationError::UnknownClient(client_id.to_string()));
        }

        if let Some(existing) = self.sessions.get_mut(client_id) {
            existing.capabilities = capabilities;
            existing.connection_id = connection_id;
            existing.last_seen = Utc::now();
            tracing::info!(
                client_id = %client_id,
                total_contributions = existing.total_contributions,
                reputation = existing.reputation_score,
                "Client session resumed"
            );
            return Ok(SessionHandle {
                client_id: client_id.to_string(),
                connection_id,
                resumed: true,
            });
        }

        if self.sessions.len() >= self.max_clients {
            return Err(FederationError::CapacityExceeded {
                max_clients: self.max_clients,
            });
        }

        self.sessions.insert(
            client_id.to_string(),
            ClientSession::new(client_id.to_string(), capabilities, connection_id),
        );
        tracing::info!(
            client_id = %client_id,
            live = self.sessions.len(),
            max = self.max_clients,
            "Client registered"
        );

        Ok(SessionHandle {
            client_id: client_id.to_string(),
            connection_id,
            resumed: false,
        })
    }

    /// Mark the client as seen now.
    pub fn touch(&mut self, client_id: &str) -> Result<(), FederationError> {
        self.touch_at(client_id, Utc::now())
    }

    pub fn touch_at(&mut self, client_id: &str, at: DateTime<Utc>) -> Result<(), FederationError> {
        let session = self
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| FederationError::UnknownClient(client_id.to_string()))?;
        session.last_seen = at;
        Ok(())
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&mut self, client_id: &str) -> Option<ClientSession> {
        let removed = self.sessions.remove(client_id);
        if removed.is_some() {
            tracing::info!(client_id = %client_id, live = self.sessions.len(), "Client session removed");
        }
        removed
    }

    /// Remove a session only if it is still bound to `connection_id`.
    ///
    /// A client that re-registered on a newer connection keeps its session
    /// when the older connection closes.
    pub fn remove_if_bound(&mut self, client_id: &str, connection_id: Uuid) -> Option<ClientSession> {
        match self.sessions.get(client_id) {
            Some(s) if s.connection_id == Some(connection_id) => self.remove(client_id),
            _ => None,
        }
    }

    /// Snapshot of live client ids.
    pub fn list_live(&self) -> BTreeSet<String> {
        self.sessions.keys().cloned().collect()
    }

    /// `(client_id, connection_id)` pairs for sessions bound to a connection.
    pub fn live_connections(&self) -> Vec<(String, Uuid)> {
        let mut out: Vec<(String, Uuid)> = self
            .sessions
            .values()
            .filter_map(|s| s.connection_id.map(|c| (s.client_id.clone(), c)))
            .collect();
        out.sort();
        out
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientSession> {
        self.sessions.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions sorted by id, for reporting.
    pub fn snapshot(&self) -> Vec<ClientSession> {
        let mut sessions: Vec<ClientSession> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        sessions
    }

    /// Book an accepted submission: spend privacy budget (floored at 0),
    /// count the contribution, refresh `last_seen`.
    ///
    /// Returns the remaining privacy budget.
    pub fn record_contribution(
        &mut self,
        client_id: &str,
        privacy_cost: f64,
    ) -> Result<f64, FederationError> {
        let session = self
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| FederationError::UnknownClient(client_id.to_string()))?;
        session.privacy_budget = (session.privacy_budget - privacy_cost.max(0.0)).max(0.0);
        session.total_contributions += 1;
        session.last_seen = Utc::now();

        if session.privacy_budget_exhausted() {
            tracing::warn!(client_id = %client_id, "Client privacy budget exhausted");
        }
        Ok(session.privacy_budget)
    }

    /// Record a global-model evaluation reported by the client.
    pub fn record_evaluation(&mut self, client_id: &str, accuracy: f64) -> Result<(), FederationError> {
        let session = self
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| FederationError::UnknownClient(client_id.to_string()))?;
        session.last_evaluation = Some(accuracy);
        session.last_seen = Utc::now();
        Ok(())
    }

    /// Set a client's reputation. Negative scores are raised to 0; non-finite
    /// scores are ignored.
    pub fn set_reputation(&mut self, client_id: &str, score: f64) -> Result<(), FederationError> {
        let session = self
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| FederationError::UnknownClient(client_id.to_string()))?;
        if score.is_finite() {
            session.reputation_score = score.max(0.0);
        } else {
            tracing::warn!(client_id = %client_id, score, "Ignoring non-finite reputation score");
        }
        Ok(())
    }

    /// Ids of sessions idle for longer than `timeout` as of `now`, sorted.
    pub fn stale_clients(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let mut stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.idle_for(now) > timeout)
            .map(|s| s.client_id.clone())
            .collect();
        stale.sort();
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rejection_is_reported_to_requester_only() {
        let mut registry = ClientRegistry::new(2);
        registry.register("a", ClientCapabilities::default(), None).unwrap();
        registry.register("b", ClientCapabilities::default(), None).unwrap();

        let err = registry
            .register("c", ClientCapabilities::default(), None)
            .unwrap_err();
        assert_eq!(err, FederationError::CapacityExceeded { max_clients: 2 });
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("c"));
    }

    #[test]
    fn test_reregistration_keeps_history_and_capacity_slot() {
        let mut registry = ClientRegistry::new(1);
        registry.register("a", ClientCapabilities::default(), None).unwrap();
        registry.record_contribution("a", 0.3).unwrap();
        registry.set_reputation("a", 1.4).unwrap();

        let caps = ClientCapabilities { data_size: 77, ..Default::default() };
        let handle = registry.register("a", caps, Some(Uuid::new_v4())).unwrap();
        assert!(handle.resumed);

        let session = registry.get("a").unwrap();
        assert_eq!(session.total_contributions, 1);
        assert!((session.reputation_score - 1.4).abs() < 1e-12);
        assert!((session.privacy_budget - 0.7).abs() < 1e-12);
        assert_eq!(session.capabilities.data_size, 77);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = ClientRegistry::new(4);
        registry.register("a", ClientCapabilities::default(), None).unwrap();
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.remove("never-registered").is_none());
    }

    #[test]
    fn test_privacy_budget_floors_at_zero() {
        let mut registry = ClientRegistry::new(4);
        registry.register("a", ClientCapabilities::default(), None).unwrap();
        assert!((registry.record_contribution("a", 0.6).unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(registry.record_contribution("a", 0.6).unwrap(), 0.0);
        let session = registry.get("a").unwrap();
        assert_eq!(session.total_contributions, 2);
        assert!(session.privacy_budget_exhausted());
    }

    #[test]
    fn test_touch_unknown_client() {
        let mut registry = ClientRegistry::new(4);
        assert!(matches!(
            registry.touch("ghost"),
            Err(FederationError::UnknownClient(_))
        ));
    }

    #[test]
    fn test_stale_clients_uses_timeout() {
        let mut registry = ClientRegistry::new(4);
        registry.register("old", ClientCapabilities::default(), None).unwrap();
        registry.register("fresh", ClientCapabilities::default(), None).unwrap();
        let now = Utc::now();
        registry
            .touch_at("old", now - chrono::Duration::seconds(700))
            .unwrap();

        let stale = registry.stale_clients(now, Duration::from_secs(600));
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[test]
    fn test_remove_if_bound_ignores_replaced_connection() {
        let mut registry = ClientRegistry::new(4);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        registry.register("a", ClientCapabilities::default(), Some(first)).unwrap();
        registry.register("a", ClientCapabilities::default(), Some(second)).unwrap();

        assert!(registry.remove_if_bound("a", first).is_none());
        assert!(registry.contains("a"));
        assert!(registry.remove_if_bound("a", second).is_some());
    }

    #[test]
    fn test_reputation_never_negative() {
        let mut registry = ClientRegistry::new(4);
        registry.register("a", ClientCapabilities::default(), None).unwrap();
        registry.set_reputation("a", -3.0).unwrap();
        assert_eq!(registry.get("a").unwrap().reputation_score, 0.0);
        registry.set_reputation("a", f64::NAN).unwrap();
        assert_eq!(registry.get("a").unwrap().reputation_score, 0.0);
    }
}
