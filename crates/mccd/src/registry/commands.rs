//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `SessionEvent`: Events published by the registry for subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use mcc_core::{Packet, SessionId, SessionInfo};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
///
/// # Usage
///
/// ```ignore
/// let (tx, rx) = oneshot::channel();
/// registry_tx.send(RegistryCommand::Count { respond_to: tx }).await?;
/// let count = rx.await?;
/// ```
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a new session into the registry.
    ///
    /// Capacity is checked and the session inserted in a single step, so
    /// the admission decision cannot race with other connections. On
    /// success the response carries the session count including the new
    /// session, which the greeting reports to the client.
    ///
    /// # Errors
    /// - `RegistryError::AtCapacity` if the session limit is reached
    /// - `RegistryError::SessionAlreadyExists` if the ID is already admitted
    Admit {
        /// ID of the session to admit
        id: SessionId,
        /// Canonical peer address, used in log lines
        peer: String,
        /// Sender half of the session's packet mailbox
        mailbox: mpsc::Sender<Packet>,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<usize, RegistryError>>,
    },

    /// Mark a session as authorized after a successful login.
    ///
    /// Records the username so later log lines and fan-out diagnostics
    /// can name the operator.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    SetAuthorized {
        /// ID of the session to update
        id: SessionId,
        /// Username the session authenticated as
        username: String,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Enable or disable packet forwarding for a session.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    SetForwarding {
        /// ID of the session to update
        id: SessionId,
        /// Whether inbound packets should be fanned out to this session
        enabled: bool,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session from the registry.
    ///
    /// On success the response carries the number of sessions remaining,
    /// which the close log line reports.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    Remove {
        /// ID of the session to remove
        id: SessionId,
        /// Why the session is going away
        reason: RemovalReason,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<usize, RegistryError>>,
    },

    /// Get the mailboxes of every session eligible for fan-out.
    ///
    /// A session is eligible when it is authorized and has forwarding
    /// enabled. The distributor snapshots this list for each inbound
    /// packet so delivery never blocks on the registry.
    FanoutTargets {
        /// Channel to send the results
        respond_to: oneshot::Sender<Vec<FanoutTarget>>,
    },

    /// Get the number of connected sessions.
    Count {
        /// Channel to send the result
        respond_to: oneshot::Sender<usize>,
    },

    /// Get a view of every connected session.
    ///
    /// Returns an empty vector if no sessions are connected.
    Sessions {
        /// Channel to send the results
        respond_to: oneshot::Sender<Vec<SessionInfo>>,
    },
}

/// A fan-out destination snapshotted from the registry.
#[derive(Debug, Clone)]
pub struct FanoutTarget {
    /// ID of the receiving session
    pub id: SessionId,
    /// Display name for log lines (`user@addr`)
    pub name: String,
    /// Sender half of the session's packet mailbox
    pub mailbox: mpsc::Sender<Packet>,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
///
/// Uses `thiserror` for ergonomic error handling and Display implementations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry has reached its configured session capacity.
    #[error("session limit reached (max: {max} sessions)")]
    AtCapacity {
        /// Maximum number of sessions allowed
        max: usize,
    },

    /// The requested session was not found.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A session with this ID already exists.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the registry to subscribers.
///
/// The server's shutdown drain watches these to learn when the last
/// session has been removed.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session was admitted into the registry.
    Admitted {
        /// ID of the admitted session
        id: SessionId,
        /// Canonical peer address
        peer: String,
    },

    /// A session was removed from the registry.
    Removed {
        /// ID of the removed session
        id: SessionId,
        /// Why the session was removed
        reason: RemovalReason,
        /// Number of sessions remaining after removal
        remaining: usize,
    },
}

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The client sent QUIT.
    ClientQuit,
    /// The client exhausted its login attempts.
    LoginFailures,
    /// The connection closed or failed mid-stream.
    Disconnected,
    /// The server is shutting down.
    Shutdown,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientQuit => write!(f, "client quit"),
            Self::LoginFailures => write!(f, "too many failed logins"),
            Self::Disconnected => write!(f, "connection closed"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}
