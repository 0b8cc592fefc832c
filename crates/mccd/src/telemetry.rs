//! Seam between the relay and the spacecraft transport.
//!
//! The relay core speaks to the radio side only through `TelemetryPort`,
//! so the server, sessions, and distributor never know what transport
//! is attached. `ChannelLink` is the in-process implementation: a pair
//! of bounded queues that a transport adapter drains and feeds. Every
//! packet crossing the seam is recorded to storage on its way through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::warn;

use mcc_core::{Direction, Packet};

use crate::storage::Storage;

/// Inbound queue depth.
const INBOUND_CAPACITY: usize = 1024;

/// Errors from submitting a packet toward the spacecraft.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The outbound queue stayed full for the whole submit window.
    #[error("outbound queue is full")]
    Saturated,

    /// The transport side of the link is gone.
    #[error("link is closed")]
    Closed,
}

/// Transport seam the relay core depends on.
#[async_trait]
pub trait TelemetryPort: Send + Sync {
    /// Queues a packet for uplink, waiting at most `wait` for space.
    async fn try_submit_outbound(&self, packet: Packet, wait: Duration) -> Result<(), LinkError>;

    /// Waits up to `wait` for the next downlink packet.
    ///
    /// Returns `None` when the window elapses with no traffic.
    async fn next_inbound(&self, wait: Duration) -> Option<Packet>;
}

/// In-process packet link backed by bounded channels.
///
/// A transport adapter holds the [`OutboundDrain`] and one or more
/// [`InboundFeed`]s; the relay holds the link itself. With no adapter
/// attached the outbound queue simply fills and SEND starts failing,
/// while REPLAY keeps working from storage.
pub struct ChannelLink {
    /// Uplink queue toward the transport adapter
    outbound_tx: mpsc::Sender<Packet>,

    /// Feed side of the downlink queue, cloned into `InboundFeed`s
    inbound_tx: mpsc::Sender<Packet>,

    /// Drain side of the downlink queue, consumed by the distributor
    inbound_rx: Mutex<mpsc::Receiver<Packet>>,

    /// Store receiving a copy of every packet crossing the seam
    recorder: Arc<dyn Storage>,
}

impl ChannelLink {
    /// Creates a link with the given outbound queue depth.
    ///
    /// Returns the link and the drain a transport adapter reads uplink
    /// packets from.
    pub fn new(
        outbound_capacity: usize,
        recorder: Arc<dyn Storage>,
    ) -> (Arc<Self>, OutboundDrain) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let link = Arc::new(Self {
            outbound_tx,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            recorder,
        });

        (
            link,
            OutboundDrain {
                receiver: outbound_rx,
            },
        )
    }

    /// Creates a feed for injecting downlink packets.
    pub fn inbound_feed(&self) -> InboundFeed {
        InboundFeed {
            sender: self.inbound_tx.clone(),
        }
    }

    /// Records a packet crossing the seam without blocking the caller.
    fn record(&self, packet: Packet, direction: Direction) {
        let recorder = Arc::clone(&self.recorder);
        tokio::spawn(async move {
            if let Err(e) = recorder.record(&packet, direction).await {
                warn!(error = %e, direction = %direction, "Failed to store packet");
            }
        });
    }
}

#[async_trait]
impl TelemetryPort for ChannelLink {
    async fn try_submit_outbound(&self, packet: Packet, wait: Duration) -> Result<(), LinkError> {
        let recorded = packet.clone();

        match timeout(wait, self.outbound_tx.send(packet)).await {
            Err(_) => Err(LinkError::Saturated),
            Ok(Err(_)) => Err(LinkError::Closed),
            Ok(Ok(())) => {
                self.record(recorded, Direction::Out);
                Ok(())
            }
        }
    }

    async fn next_inbound(&self, wait: Duration) -> Option<Packet> {
        let mut receiver = self.inbound_rx.lock().await;

        match timeout(wait, receiver.recv()).await {
            Err(_) => None,
            Ok(None) => None,
            Ok(Some(packet)) => {
                self.record(packet.clone(), Direction::In);
                Some(packet)
            }
        }
    }
}

/// Feed half used by transport adapters to inject downlink packets.
#[derive(Clone)]
pub struct InboundFeed {
    sender: mpsc::Sender<Packet>,
}

impl InboundFeed {
    /// Injects a received packet into the relay.
    ///
    /// Waits for queue space, applying backpressure to the transport.
    ///
    /// # Errors
    /// - `LinkError::Closed` if the link has been dropped
    pub async fn inject(&self, packet: Packet) -> Result<(), LinkError> {
        self.sender
            .send(packet)
            .await
            .map_err(|_| LinkError::Closed)
    }
}

/// Drain half a transport adapter reads uplink packets from.
pub struct OutboundDrain {
    receiver: mpsc::Receiver<Packet>,
}

impl OutboundDrain {
    /// Receives the next packet queued for uplink.
    ///
    /// Returns `None` once the link is dropped.
    pub async fn next(&mut self) -> Option<Packet> {
        self.receiver.recv().await
    }
}
