//! Client handle for interacting with the registry actor.
//!
//! `RegistryHandle` is a cheap clone holding the command sender and the
//! event broadcaster. Sessions, the listener, and the distributor all
//! talk to the actor through it.

use tokio::sync::{broadcast, mpsc, oneshot};

use mcc_core::{Packet, SessionId, SessionInfo};

use super::commands::{FanoutTarget, RegistryCommand, RegistryError, RemovalReason, SessionEvent};

/// Handle for sending commands to the registry actor.
///
/// All methods are async and communicate with the actor via channels.
/// If the actor has stopped, mutating calls return `RegistryError::ChannelClosed`
/// and read-only calls degrade to empty results.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Channel for sending commands to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Broadcast channel for subscribing to events
    event_sender: broadcast::Sender<SessionEvent>,
}

impl RegistryHandle {
    /// Creates a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Admits a session into the registry.
    ///
    /// Returns the session count including the new session.
    ///
    /// # Errors
    /// - `RegistryError::AtCapacity` if the session limit is reached
    /// - `RegistryError::SessionAlreadyExists` if the ID is already admitted
    /// - `RegistryError::ChannelClosed` if the actor has stopped
    pub async fn admit(
        &self,
        id: SessionId,
        peer: String,
        mailbox: mpsc::Sender<Packet>,
    ) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Admit {
                id,
                peer,
                mailbox,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Marks a session as authorized under the given username.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    /// - `RegistryError::ChannelClosed` if the actor has stopped
    pub async fn set_authorized(
        &self,
        id: SessionId,
        username: String,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SetAuthorized {
                id,
                username,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Enables or disables packet forwarding for a session.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    /// - `RegistryError::ChannelClosed` if the actor has stopped
    pub async fn set_forwarding(&self, id: SessionId, enabled: bool) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SetForwarding {
                id,
                enabled,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a session from the registry.
    ///
    /// Returns the number of sessions remaining.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    /// - `RegistryError::ChannelClosed` if the actor has stopped
    pub async fn remove(
        &self,
        id: SessionId,
        reason: RemovalReason,
    ) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Remove {
                id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Snapshots the sessions eligible for packet fan-out.
    ///
    /// Returns an empty vector if the actor has stopped.
    pub async fn fanout_targets(&self) -> Vec<FanoutTarget> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::FanoutTargets { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns the number of connected sessions.
    ///
    /// Returns 0 if the actor has stopped.
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Returns a view of every connected session.
    ///
    /// Returns an empty vector if the actor has stopped.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Sessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Checks if the registry actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;

    fn dead_handle() -> RegistryHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(1);
        drop(cmd_rx);
        RegistryHandle::new(cmd_tx, event_tx)
    }

    #[tokio::test]
    async fn test_round_trip_through_spawned_actor() {
        let handle = spawn_registry(0);

        let (mailbox, _rx) = mpsc::channel(8);
        let count = handle
            .admit(SessionId::new(1), "127.0.0.1:50000".to_string(), mailbox)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(handle.count().await, 1);

        handle
            .set_authorized(SessionId::new(1), "alice".to_string())
            .await
            .unwrap();
        handle.set_forwarding(SessionId::new(1), true).await.unwrap();

        let targets = handle.fanout_targets().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "alice@127.0.0.1:50000");

        let remaining = handle
            .remove(SessionId::new(1), RemovalReason::ClientQuit)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_handle_is_cloneable() {
        let handle = spawn_registry(0);
        let clone = handle.clone();

        let (mailbox, _rx) = mpsc::channel(8);
        clone
            .admit(SessionId::new(1), "127.0.0.1:50000".to_string(), mailbox)
            .await
            .unwrap();
        assert_eq!(handle.count().await, 1);
    }

    #[tokio::test]
    async fn test_mutations_fail_when_actor_stopped() {
        let handle = dead_handle();

        let (mailbox, _rx) = mpsc::channel(8);
        let result = handle
            .admit(SessionId::new(1), "127.0.0.1:50000".to_string(), mailbox)
            .await;
        assert!(matches!(result, Err(RegistryError::ChannelClosed)));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_reads_degrade_when_actor_stopped() {
        let handle = dead_handle();

        assert_eq!(handle.count().await, 0);
        assert!(handle.fanout_targets().await.is_empty());
        assert!(handle.sessions().await.is_empty());
    }
}
