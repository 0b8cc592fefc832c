//! TCP front end of the relay daemon.
//!
//! The server:
//! - Listens on a dual-stack TCP socket, optionally wrapped in TLS
//! - Enforces the session limit at admission time
//! - Spawns a Session (reader task + mailbox writer task) per client
//! - Sequences graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() / TLS handshake
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  RegistryHandle │
//! │  (per client)   │     │                 │
//! └─────────────────┘     └─────────────────┘
//!         ▲
//!         │ mailbox
//! ┌───────┴─────────┐
//! │   Distributor   │
//! │ (PACKET frames) │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Per-connection errors are logged and never stop the accept loop

mod listener;
mod session;
mod tls;

pub use listener::{RelayServer, ServerError};
pub use session::SessionError;
pub use tls::{build_acceptor, TlsError};

use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream a session runs over, plain TCP or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> Stream for T {}

/// Boxed stream erasing the TCP/TLS distinction.
pub type BoxedStream = Box<dyn Stream>;

/// Capacity of each session's packet mailbox.
///
/// The distributor drops (and logs) fan-out packets for a session whose
/// mailbox is full; replay traffic instead waits for space.
pub(crate) const MAILBOX_CAPACITY: usize = 1024;
