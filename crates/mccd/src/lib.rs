//! MCC Daemon - ground station relay server
//!
//! This crate provides the core infrastructure for the MCC daemon:
//! - `registry` - Session registry actor tracking connected operator clients
//! - `server` - TCP/TLS server accepting client connections
//! - `distributor` - Distribution loop fanning inbound packets out to clients
//! - `storage` - SQLite persistence for users and packet history
//! - `telemetry` - Seam between the relay and the spacecraft transport
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       mccd daemon                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   RelayServer   │────▶│       RegistryActor         │    │
//! │  │   (TCP/TLS)     │     │   (session state owner)     │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ connections                 │ fan-out targets   │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐    │
//! │  │     Session     │◀────│         Distributor         │    │
//! │  │  (per client)   │     │   (inbound packet fan-out)  │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │ SEND                        │ next_inbound      │
//! │           ▼                             │                   │
//! │  ┌─────────────────────────────────────┴───────────────┐    │
//! │  │                    TelemetryPort                    │    │
//! │  │              (spacecraft link seam)                 │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod distributor;
pub mod registry;
pub mod server;
pub mod storage;
pub mod telemetry;
