//! Read-only HTTP status API and live event stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};

use flc_protocol::{FederationError, PROTOCOL_VERSION};

use crate::coordinator::Coordinator;

const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Clone)]
struct WebState {
    coordinator: Arc<Coordinator>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// Read-only HTTP view of a running coordinator.
pub struct HttpApi {
    /// Address to listen on, e.g. `127.0.0.1:8766`.
    bind_addr: String,
    /// Coordinator whose state and history are served.
    coordinator: Arc<Coordinator>,
}

impl HttpApi {
    pub fn new(bind_addr: String, coordinator: Arc<Coordinator>) -> Self {
        Self {
            bind_addr,
            coordinator,
        }
    }

    pub fn router(coordinator: Arc<Coordinator>) -> Router {
        Router::new()
            .route("/api/health", get(api_health))
            .route("/api/status", get(api_status))
            .route("/api/clients", get(api_clients))
            .route("/api/clients/:client_id/participation", get(api_participation))
            .route("/api/history", get(api_history))
            .route("/api/history/summary", get(api_history_summary))
            .route("/api/stream", get(api_stream))
            .with_state(WebState { coordinator })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let app = Self::router(self.coordinator);
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "HTTP status API listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        Ok(())
    }
}

/// Store failures surface to operators as 500 with the error code.
struct ApiError(FederationError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Status API query failed");
        let body = Json(serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "flc-coordinator",
        "protocol_version": PROTOCOL_VERSION,
    }))
}

async fn api_status(State(web): State<WebState>) -> Json<serde_json::Value> {
    Json(serde_json::json!(web.coordinator.status().await))
}

async fn api_clients(State(web): State<WebState>) -> Json<serde_json::Value> {
    let clients = web.coordinator.clients().await;
    Json(serde_json::json!({
        "count": clients.len(),
        "clients": clients,
    }))
}

async fn api_participation(
    State(web): State<WebState>,
    Path(client_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = web
        .coordinator
        .client_participation(&client_id, query.limit())
        .await
        .map_err(ApiError)?;
    let live = web.coordinator.client(&client_id).await;
    Ok(Json(serde_json::json!({
        "client_id": client_id,
        "live": live.is_some(),
        "session": live,
        "participation": rows,
    })))
}

async fn api_history(
    State(web): State<WebState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rounds = web.coordinator.history(query.limit()).await.map_err(ApiError)?;
    Ok(Json(serde_json::json!({ "rounds": rounds })))
}

async fn api_history_summary(
    State(web): State<WebState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = web.coordinator.history_summary().await.map_err(ApiError)?;
    Ok(Json(serde_json::json!(summary)))
}

async fn api_stream(ws: WebSocketUpgrade, State(web): State<WebState>) -> impl IntoResponse {
    let events = web.coordinator.subscribe();
    ws.on_upgrade(move |socket| stream_loop(socket, events))
}

async fn stream_loop(mut socket: WebSocket, mut events: broadcast::Receiver<crate::CoordinatorEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Status stream subscriber lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode stream event");
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}
