//! Session registry using Actor pattern.
//!
//! The registry is the central state manager for all connected client
//! sessions. It receives commands via a tokio mpsc channel and maintains
//! the canonical source of truth for session state: who is connected,
//! who has authenticated, and who wants packets forwarded.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │     Session     │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   SessionEvent        │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    Admit/SetForwarding     HashMap<SessionId,      Shutdown drain
//!    /Remove sessions        SessionEntry>           watches removals
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{FanoutTarget, RegistryCommand, RegistryError, RemovalReason, SessionEvent};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Returns a RegistryHandle for client use
///
/// `max_sessions` is the admission limit; 0 means unlimited.
///
/// # Example
///
/// ```no_run
/// use mccd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(10);
///
///     // Use handle to interact with registry
///     let sessions = handle.sessions().await;
/// }
/// ```
pub fn spawn_registry(max_sessions: usize) -> RegistryHandle {
    // Create channels
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    // Create and spawn actor
    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_sessions);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
