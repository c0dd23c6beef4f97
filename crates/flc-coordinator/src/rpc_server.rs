//! Newline-delimited JSON transport for federation clients.
//!
//! Each line received is one [`ClientMessage`]; each line sent is one
//! [`ServerMessage`], either a response or an `aggregation_complete`
//! broadcast. Every connection gets a writer task fed by a bounded queue so
//! broadcasts never wait on a slow socket.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use flc_protocol::{ClientMessage, ErrorParams, ServerMessage};

use crate::coordinator::{Coordinator, Reply};

/// Error code sent for lines that are not a known client message.
pub const INVALID_MESSAGE_CODE: &str = "invalid_message";

/// Accepts client connections and feeds their lines to the coordinator.
pub struct RpcServer {
    /// Address to listen on, e.g. `127.0.0.1:8765`.
    bind_addr: String,
    /// Shared coordinator handling every connection's messages.
    coordinator: Arc<Coordinator>,
    /// Connections served at once; further ones wait for a free slot.
    max_connections: usize,
    /// Outbound messages queued per connection before broadcasts to it fail.
    outbound_queue: usize,
}

impl RpcServer {
    pub fn new(
        bind_addr: String,
        coordinator: Arc<Coordinator>,
        max_connections: usize,
        outbound_queue: usize,
    ) -> Self {
        Self {
            bind_addr,
            coordinator,
            max_connections,
            outbound_queue,
        }
    }

    /// Bind `bind_addr` and serve until `shutdown` changes.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(addr = %listener.local_addr()?, "Federation transport listening");
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_connections));

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.changed() => break,
            };
            tracing::debug!(peer = %peer_addr, "Client connected");

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit?,
                _ = shutdown.changed() => break,
            };
            let coordinator = Arc::clone(&self.coordinator);
            let outbound_queue = self.outbound_queue;
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, coordinator, outbound_queue, shutdown).await {
                    tracing::warn!(peer = %peer_addr, error = %e, "Connection error");
                }
                drop(permit);
            });
        }

        tracing::info!("Federation transport stopped");
        Ok(())
    }
}

/// Serve one client connection until it closes, sends a message that ends
/// the session, or the server shuts down.
async fn handle_connection(
    stream: TcpStream,
    coordinator: Arc<Coordinator>,
    outbound_queue: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(outbound_queue);
    let connection_id = coordinator.attach(tx.clone()).await;
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break Ok(()),
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = process_line(&line, connection_id, &coordinator).await;
        if tx.send(reply.message).await.is_err() {
            break Ok(());
        }
        if reply.close {
            break Ok(());
        }
    };

    // Dropping every sender lets the writer drain what is queued and exit.
    coordinator.detach(connection_id).await;
    drop(tx);
    match writer_task.await {
        Ok(Err(e)) => tracing::debug!(%connection_id, error = %e, "Writer ended with error"),
        Err(e) => tracing::warn!(%connection_id, error = %e, "Writer task failed"),
        Ok(Ok(())) => {}
    }
    result
}

async fn process_line(line: &str, connection_id: Uuid, coordinator: &Coordinator) -> Reply {
    match ClientMessage::from_json(line) {
        Ok(message) => coordinator.handle_message(Some(connection_id), message).await,
        Err(e) => {
            tracing::debug!(%connection_id, error = %e, "Unparseable message");
            Reply {
                message: ServerMessage::Error(ErrorParams {
                    code: INVALID_MESSAGE_CODE.to_string(),
                    message: e.to_string(),
                }),
                close: false,
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ServerMessage>,
) -> Result<(), anyhow::Error> {
    while let Some(message) = rx.recv().await {
        let json = message.to_json()?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
