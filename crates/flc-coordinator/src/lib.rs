//! FLC Coordinator - federation server, transport and client library.
//!
//! - [`coordinator`]: session/round orchestration, broadcast, history access
//! - [`liveness`]: eviction of inactive sessions
//! - [`rpc_server`]: newline-delimited JSON transport for clients
//! - [`http_api`]: read-only status API and event stream
//! - [`client`]: client session library and simulated trainer
//! - [`config`]: TOML configuration

pub mod client;
pub mod config;
pub mod coordinator;
pub mod http_api;
pub mod liveness;
pub mod rpc_server;

pub use client::{ClientError, ClientStats, CoordinatorClient, LocalUpdate, SimulatedTrainer, Trainer};
pub use config::CoordinatorConfig;
pub use coordinator::{
    Coordinator, CoordinatorEvent, CoordinatorHandle, CoordinatorStatus, EvictionReason, Reply,
};
pub use http_api::HttpApi;
pub use liveness::LivenessMonitor;
pub use rpc_server::RpcServer;
