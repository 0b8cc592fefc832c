//! Registry actor implementation.
//!
//! The actor owns the session table and processes commands sequentially,
//! so admission checks, flag updates, and removals never race. Sessions
//! and the distributor interact with it through `RegistryHandle`.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use mcc_core::{Packet, SessionId, SessionInfo};

use super::commands::{FanoutTarget, RegistryCommand, RegistryError, RemovalReason, SessionEvent};

/// One admitted session as the registry tracks it.
struct SessionEntry {
    /// Snapshot served to `Sessions` queries
    info: SessionInfo,
    /// Sender half of the session's packet mailbox
    mailbox: mpsc::Sender<Packet>,
}

/// The registry actor that owns all session state.
///
/// Holds the canonical session table. Commands arrive via mpsc channel,
/// lifecycle events go out via broadcast channel.
pub struct RegistryActor {
    /// Channel for receiving commands
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Admitted sessions, keyed by session ID
    sessions: HashMap<SessionId, SessionEntry>,

    /// Channel for publishing lifecycle events
    event_publisher: broadcast::Sender<SessionEvent>,

    /// Session limit from configuration (0 = unlimited)
    max_sessions: usize,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<SessionEvent>,
        max_sessions: usize,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            event_publisher,
            max_sessions,
        }
    }

    /// Runs the actor's message loop.
    ///
    /// Processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Session registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Session registry stopped");
    }

    /// Handles a single command.
    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Admit {
                id,
                peer,
                mailbox,
                respond_to,
            } => {
                let result = self.admit(id, peer, mailbox);
                let _ = respond_to.send(result);
            }

            RegistryCommand::SetAuthorized {
                id,
                username,
                respond_to,
            } => {
                let result = self.set_authorized(id, username);
                let _ = respond_to.send(result);
            }

            RegistryCommand::SetForwarding {
                id,
                enabled,
                respond_to,
            } => {
                let result = self.set_forwarding(id, enabled);
                let _ = respond_to.send(result);
            }

            RegistryCommand::Remove {
                id,
                reason,
                respond_to,
            } => {
                let result = self.remove(id, reason);
                let _ = respond_to.send(result);
            }

            RegistryCommand::FanoutTargets { respond_to } => {
                let _ = respond_to.send(self.fanout_targets());
            }

            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }

            RegistryCommand::Sessions { respond_to } => {
                let _ = respond_to.send(self.session_views());
            }
        }
    }

    /// Admits a session, checking capacity and inserting in one step.
    ///
    /// Returns the session count including the new session.
    fn admit(
        &mut self,
        id: SessionId,
        peer: String,
        mailbox: mpsc::Sender<Packet>,
    ) -> Result<usize, RegistryError> {
        if self.sessions.contains_key(&id) {
            return Err(RegistryError::SessionAlreadyExists(id));
        }

        if self.max_sessions > 0 && self.sessions.len() >= self.max_sessions {
            debug!(
                session = %id,
                peer = %peer,
                max = self.max_sessions,
                "Admission refused, session limit reached"
            );
            return Err(RegistryError::AtCapacity {
                max: self.max_sessions,
            });
        }

        let info = SessionInfo {
            id,
            peer: peer.clone(),
            username: None,
            authorized: false,
            forwarding: false,
            connected_at: Utc::now(),
        };
        self.sessions.insert(id, SessionEntry { info, mailbox });

        let count = self.sessions.len();
        debug!(session = %id, peer = %peer, users = count, "Session admitted");
        self.publish_event(SessionEvent::Admitted { id, peer });

        Ok(count)
    }

    /// Marks a session as authorized and records its username.
    fn set_authorized(&mut self, id: SessionId, username: String) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;

        debug!(session = %id, user = %username, "Session authorized");
        entry.info.username = Some(username);
        entry.info.authorized = true;

        Ok(())
    }

    /// Updates a session's forwarding flag.
    fn set_forwarding(&mut self, id: SessionId, enabled: bool) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;

        entry.info.forwarding = enabled;
        debug!(session = %id, enabled, "Forwarding updated");

        Ok(())
    }

    /// Removes a session, returning the number of sessions remaining.
    fn remove(&mut self, id: SessionId, reason: RemovalReason) -> Result<usize, RegistryError> {
        let entry = self
            .sessions
            .remove(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;

        let remaining = self.sessions.len();
        info!(
            session = %entry.info.display_name(),
            reason = %reason,
            users = remaining,
            "Closed connection"
        );
        self.publish_event(SessionEvent::Removed {
            id,
            reason,
            remaining,
        });

        Ok(remaining)
    }

    /// Snapshots the sessions eligible for packet fan-out.
    ///
    /// Eligible means authorized with forwarding enabled.
    fn fanout_targets(&self) -> Vec<FanoutTarget> {
        self.sessions
            .values()
            .filter(|entry| entry.info.authorized && entry.info.forwarding)
            .map(|entry| FanoutTarget {
                id: entry.info.id,
                name: entry.info.display_name(),
                mailbox: entry.mailbox.clone(),
            })
            .collect()
    }

    /// Clones a view of every session.
    fn session_views(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(|entry| entry.info.clone()).collect()
    }

    /// Publishes an event to subscribers.
    fn publish_event(&self, event: SessionEvent) {
        // Ignore send errors - no subscribers is fine
        let _ = self.event_publisher.send(event);
    }

    /// Returns the number of sessions (for testing).
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
