//! Distribution loop fanning downlink packets out to sessions.
//!
//! A single task polls the telemetry link and copies each packet into
//! the mailbox of every forwarding session. Delivery uses `try_send`,
//! so one slow client drops its own copy without stalling the link or
//! the other sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::RegistryHandle;
use crate::telemetry::TelemetryPort;

/// How long one poll of the link waits before checking for shutdown.
const IDLE_POLL: Duration = Duration::from_secs(30);

/// The packet distribution loop.
pub struct Distributor {
    /// Registry queried for fan-out targets
    registry: RegistryHandle,

    /// Link polled for downlink packets
    link: Arc<dyn TelemetryPort>,

    /// Local node address, used to classify local traffic
    local_node: u8,

    /// Token stopping the loop
    cancel: CancellationToken,
}

impl Distributor {
    /// Creates a new distributor.
    pub fn new(
        registry: RegistryHandle,
        link: Arc<dyn TelemetryPort>,
        local_node: u8,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            link,
            local_node,
            cancel,
        }
    }

    /// Runs the distribution loop until cancelled.
    pub async fn run(self) {
        info!("Packet distributor started");

        let mut received: u64 = 0;
        let mut transmitted: u64 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                }

                maybe = self.link.next_inbound(IDLE_POLL) => {
                    let Some(packet) = maybe else {
                        // Idle window elapsed with no traffic
                        continue;
                    };

                    if packet.is_transmit(self.local_node) {
                        transmitted += 1;
                    } else {
                        received += 1;
                    }

                    let targets = self.registry.fanout_targets().await;
                    debug!(
                        packet = %packet,
                        targets = targets.len(),
                        "Distributing packet"
                    );

                    for target in targets {
                        match target.mailbox.try_send(packet.clone()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(
                                    session = %target.name,
                                    "Session mailbox full, dropping packet"
                                );
                            }
                            Err(TrySendError::Closed(_)) => {
                                // Session is tearing down, registry will catch up
                                debug!(
                                    session = %target.name,
                                    "Session mailbox closed, skipping"
                                );
                            }
                        }
                    }
                }
            }
        }

        info!(received, transmitted, "Packet distributor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::storage::{SqliteStorage, Storage};
    use crate::telemetry::ChannelLink;
    use mcc_core::{Packet, SessionId};
    use tokio::sync::mpsc;

    async fn test_setup() -> (RegistryHandle, Arc<ChannelLink>, CancellationToken) {
        let registry = spawn_registry(0);
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let (link, _drain) = ChannelLink::new(10, storage);
        // Drain is dropped: these tests only exercise the inbound side
        let cancel = CancellationToken::new();

        let distributor = Distributor::new(registry.clone(), link.clone(), 9, cancel.clone());
        tokio::spawn(distributor.run());

        (registry, link, cancel)
    }

    async fn forwarding_session(
        registry: &RegistryHandle,
        id: u64,
        user: &str,
    ) -> mpsc::Receiver<Packet> {
        let (mailbox, rx) = mpsc::channel(8);
        registry
            .admit(SessionId::new(id), format!("127.0.0.1:{}", 50000 + id), mailbox)
            .await
            .unwrap();
        registry
            .set_authorized(SessionId::new(id), user.to_string())
            .await
            .unwrap();
        registry
            .set_forwarding(SessionId::new(id), true)
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_packet_fans_out_to_forwarding_sessions() {
        let (registry, link, cancel) = test_setup().await;

        let mut alice = forwarding_session(&registry, 1, "alice").await;
        let mut bob = forwarding_session(&registry, 2, "bob").await;

        let packet = Packet::new(3, 20, 9, 10, vec![0xaa]).unwrap();
        link.inbound_feed().inject(packet.clone()).await.unwrap();

        assert_eq!(alice.recv().await.unwrap(), packet);
        assert_eq!(bob.recv().await.unwrap(), packet);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_non_forwarding_session_receives_nothing() {
        let (registry, link, cancel) = test_setup().await;

        let mut alice = forwarding_session(&registry, 1, "alice").await;

        // Bob is authorized but never sent START
        let (mailbox, mut bob) = mpsc::channel(8);
        registry
            .admit(SessionId::new(2), "127.0.0.1:50002".to_string(), mailbox)
            .await
            .unwrap();
        registry
            .set_authorized(SessionId::new(2), "bob".to_string())
            .await
            .unwrap();

        let packet = Packet::new(3, 20, 9, 10, vec![0xbb]).unwrap();
        link.inbound_feed().inject(packet.clone()).await.unwrap();

        // Alice receiving proves the distributor has processed the packet
        assert_eq!(alice.recv().await.unwrap(), packet);
        assert!(bob.try_recv().is_err());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_slow_session_does_not_block_others() {
        let (registry, link, cancel) = test_setup().await;

        // Slow session with a single-slot mailbox that never drains
        let (mailbox, _slow_rx) = mpsc::channel(1);
        registry
            .admit(SessionId::new(1), "127.0.0.1:50001".to_string(), mailbox)
            .await
            .unwrap();
        registry
            .set_authorized(SessionId::new(1), "slow".to_string())
            .await
            .unwrap();
        registry
            .set_forwarding(SessionId::new(1), true)
            .await
            .unwrap();

        let mut healthy = forwarding_session(&registry, 2, "healthy").await;

        for n in 0..3u8 {
            let packet = Packet::new(3, 20, 9, 10, vec![n]).unwrap();
            link.inbound_feed().inject(packet).await.unwrap();
        }

        // The healthy session still receives all three packets
        for n in 0..3u8 {
            assert_eq!(healthy.recv().await.unwrap().payload(), &[n]);
        }

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_distributor_stops_on_cancel() {
        let registry = spawn_registry(0);
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let (link, _drain) = ChannelLink::new(10, storage);
        let cancel = CancellationToken::new();

        let distributor = Distributor::new(registry, link, 9, cancel.clone());
        let task = tokio::spawn(distributor.run());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("distributor did not stop")
            .unwrap();
    }
}
