//! FLC Protocol - Core types and message definitions
//!
//! Implements the federated learning coordination message set as
//! newline-delimited JSON objects tagged by a `type` field.

pub mod constants;
pub mod error;
pub mod integrity;
pub mod messages;
pub mod types;

pub use constants::*;
pub use error::*;
pub use messages::*;
pub use types::*;
