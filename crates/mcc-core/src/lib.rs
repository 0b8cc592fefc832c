//! MCC Core - Shared domain types for the MCC relay server
//!
//! This crate provides the value types shared between the daemon (mccd)
//! and the wire protocol layer (mcc-protocol): packets, session identity,
//! and configuration.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod packet;
pub mod session;

// Re-exports for convenience
pub use config::{Config, ConfigError, DatabaseConfig, LinkConfig, ServerConfig};
pub use error::{PacketError, PacketResult};
pub use packet::{
    Direction, Packet, EPHEMERAL_PORT_MIN, MAX_PAYLOAD_LEN, NODE_MAX, PORT_MAX,
};
pub use session::{SessionId, SessionInfo};
