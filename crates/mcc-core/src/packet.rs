//! Packet value type and wire codec.
//!
//! A packet is an addressed unit of data flowing between the spacecraft
//! transport and connected clients. Addressing follows the space segment's
//! conventions: 5-bit node addresses (0-31) and 6-bit ports (0-63).

use crate::error::{PacketError, PacketResult};
use chrono::Utc;
use std::fmt;

// ============================================================================
// Address Space Limits
// ============================================================================

/// Highest valid node address (5-bit address space).
pub const NODE_MAX: u8 = 31;

/// Highest valid port (6-bit port space).
pub const PORT_MAX: u8 = 63;

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Lowest port in the ephemeral range.
///
/// Outbound packets originated by this server are stamped with an
/// ephemeral source port; traffic from the local node on an ephemeral
/// port is counted as transmitted rather than received.
pub const EPHEMERAL_PORT_MIN: u8 = 17;

// ============================================================================
// Direction
// ============================================================================

/// Direction of a packet relative to the ground station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Downlink: spacecraft transport toward clients.
    In,
    /// Uplink: clients toward the spacecraft transport.
    Out,
}

impl Direction {
    /// Returns the database tag for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Current time in microseconds since the Unix epoch.
///
/// Packet timestamps use microsecond resolution so that replay ordering
/// is stable even for packets received within the same millisecond.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// An addressed unit of data with a receive/send timestamp.
///
/// Immutable once constructed; historical packets are rebuilt from
/// storage with their persisted timestamp via [`Packet::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    source: u8,
    sport: u8,
    dest: u8,
    dport: u8,
    payload: Vec<u8>,
    timestamp: i64,
}

impl Packet {
    /// Creates a packet stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if an address component is out of range or the
    /// payload exceeds [`MAX_PAYLOAD_LEN`].
    pub fn new(source: u8, sport: u8, dest: u8, dport: u8, payload: Vec<u8>) -> PacketResult<Self> {
        Self::from_parts(source, sport, dest, dport, payload, now_micros())
    }

    /// Creates a packet with an explicit timestamp.
    ///
    /// Used when reconstructing historical packets from storage, which
    /// must keep their original receive time.
    pub fn from_parts(
        source: u8,
        sport: u8,
        dest: u8,
        dport: u8,
        payload: Vec<u8>,
        timestamp: i64,
    ) -> PacketResult<Self> {
        if source > NODE_MAX {
            return Err(PacketError::InvalidNode(source));
        }
        if dest > NODE_MAX {
            return Err(PacketError::InvalidNode(dest));
        }
        if sport > PORT_MAX {
            return Err(PacketError::InvalidPort(sport));
        }
        if dport > PORT_MAX {
            return Err(PacketError::InvalidPort(dport));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLong(payload.len()));
        }
        Ok(Self {
            source,
            sport,
            dest,
            dport,
            payload,
            timestamp,
        })
    }

    /// Source node address.
    pub fn source(&self) -> u8 {
        self.source
    }

    /// Source port.
    pub fn sport(&self) -> u8 {
        self.sport
    }

    /// Destination node address.
    pub fn dest(&self) -> u8 {
        self.dest
    }

    /// Destination port.
    pub fn dport(&self) -> u8 {
        self.dport
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Timestamp in microseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Payload as lowercase hex.
    pub fn payload_hex(&self) -> String {
        hex::encode(&self.payload)
    }

    /// True if this packet was originated by the local node.
    ///
    /// Local traffic carries the server's node address and an ephemeral
    /// source port; everything else is inbound spacecraft traffic.
    pub fn is_transmit(&self, local_node: u8) -> bool {
        self.source == local_node && self.sport >= EPHEMERAL_PORT_MIN
    }

    /// Encodes the packet for the wire:
    /// `src:sport dst:dport hexpayload timestamp`.
    ///
    /// An empty payload encodes as an empty hex field, leaving two
    /// adjacent spaces in the frame.
    pub fn to_wire(&self) -> String {
        format!(
            "{}:{} {}:{} {} {}",
            self.source,
            self.sport,
            self.dest,
            self.dport,
            self.payload_hex(),
            self.timestamp
        )
    }

    /// Decodes a wire frame produced by [`Packet::to_wire`].
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::MalformedFrame`] for structural problems
    /// and the range errors from [`Packet::from_parts`] for out-of-range
    /// addresses.
    pub fn from_wire(text: &str) -> PacketResult<Self> {
        // Split on single spaces: the payload field may be empty, which
        // split_whitespace would silently swallow.
        let mut fields = text.split(' ');
        let src = fields
            .next()
            .ok_or_else(|| PacketError::malformed("missing source address"))?;
        let dst = fields
            .next()
            .ok_or_else(|| PacketError::malformed("missing destination address"))?;
        let payload_hex = fields
            .next()
            .ok_or_else(|| PacketError::malformed("missing payload"))?;
        let timestamp = fields
            .next()
            .ok_or_else(|| PacketError::malformed("missing timestamp"))?;
        if fields.next().is_some() {
            return Err(PacketError::malformed("trailing fields"));
        }

        let (source, sport) = parse_address(src)?;
        let (dest, dport) = parse_address(dst)?;
        let payload = hex::decode(payload_hex)
            .map_err(|e| PacketError::malformed(format!("payload is not hex: {e}")))?;
        let timestamp = timestamp
            .parse::<i64>()
            .map_err(|_| PacketError::malformed(format!("timestamp '{timestamp}' is not an integer")))?;

        Self::from_parts(source, sport, dest, dport, payload, timestamp)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// Parses a `node:port` address pair.
fn parse_address(text: &str) -> PacketResult<(u8, u8)> {
    let (node, port) = text
        .split_once(':')
        .ok_or_else(|| PacketError::malformed(format!("address '{text}' is not node:port")))?;
    let node = node
        .parse::<u8>()
        .map_err(|_| PacketError::malformed(format!("node '{node}' is not a number")))?;
    let port = port
        .parse::<u8>()
        .map_err(|_| PacketError::malformed(format!("port '{port}' is not a number")))?;
    Ok((node, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_packet_stamps_current_time() {
        let before = now_micros();
        let packet = Packet::new(3, 12, 1, 20, vec![0xaa, 0xbb]).unwrap();
        let after = now_micros();

        assert!(packet.timestamp() >= before);
        assert!(packet.timestamp() <= after);
    }

    #[test]
    fn test_new_packet_rejects_out_of_range_node() {
        let err = Packet::new(32, 0, 1, 20, vec![]).unwrap_err();
        assert_eq!(err, PacketError::InvalidNode(32));

        let err = Packet::new(3, 0, 200, 20, vec![]).unwrap_err();
        assert_eq!(err, PacketError::InvalidNode(200));
    }

    #[test]
    fn test_new_packet_rejects_out_of_range_port() {
        let err = Packet::new(3, 64, 1, 20, vec![]).unwrap_err();
        assert_eq!(err, PacketError::InvalidPort(64));

        let err = Packet::new(3, 12, 1, 100, vec![]).unwrap_err();
        assert_eq!(err, PacketError::InvalidPort(100));
    }

    #[test]
    fn test_new_packet_rejects_oversized_payload() {
        let err = Packet::new(3, 12, 1, 20, vec![0u8; 257]).unwrap_err();
        assert_eq!(err, PacketError::PayloadTooLong(257));

        // 256 bytes is still fine
        assert!(Packet::new(3, 12, 1, 20, vec![0u8; 256]).is_ok());
    }

    #[test]
    fn test_wire_round_trip() {
        let packet = Packet::from_parts(3, 12, 1, 20, vec![0xaa, 0xbb, 0xcc], 1_300_000_000_123_456)
            .unwrap();
        let wire = packet.to_wire();
        assert_eq!(wire, "3:12 1:20 aabbcc 1300000000123456");

        let decoded = Packet::from_wire(&wire).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_wire_round_trip_empty_payload() {
        let packet = Packet::from_parts(9, 17, 1, 0, vec![], 42).unwrap();
        let wire = packet.to_wire();

        // Empty payload leaves two adjacent spaces
        assert_eq!(wire, "9:17 1:0  42");

        let decoded = Packet::from_wire(&wire).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_from_wire_rejects_missing_fields() {
        assert!(Packet::from_wire("3:12 1:20 aabb").is_err());
        assert!(Packet::from_wire("3:12").is_err());
        assert!(Packet::from_wire("").is_err());
    }

    #[test]
    fn test_from_wire_rejects_trailing_fields() {
        assert!(Packet::from_wire("3:12 1:20 aabb 42 extra").is_err());
    }

    #[test]
    fn test_from_wire_rejects_bad_hex() {
        assert!(Packet::from_wire("3:12 1:20 xyz 42").is_err());
        // Odd number of hex digits
        assert!(Packet::from_wire("3:12 1:20 abc 42").is_err());
    }

    #[test]
    fn test_from_wire_rejects_bad_address() {
        assert!(Packet::from_wire("3-12 1:20 aabb 42").is_err());
        assert!(Packet::from_wire("99:12 1:20 aabb 42").is_err());
        assert!(Packet::from_wire("3:99 1:20 aabb 42").is_err());
    }

    #[test]
    fn test_is_transmit_classification() {
        let local = 9;

        let tx = Packet::from_parts(9, 17, 1, 20, vec![], 0).unwrap();
        assert!(tx.is_transmit(local));

        // Local node but below the ephemeral range
        let service = Packet::from_parts(9, 16, 1, 20, vec![], 0).unwrap();
        assert!(!service.is_transmit(local));

        // Foreign node
        let rx = Packet::from_parts(3, 20, 9, 17, vec![], 0).unwrap();
        assert!(!rx.is_transmit(local));
    }

    #[test]
    fn test_direction_tags() {
        assert_eq!(Direction::In.as_str(), "IN");
        assert_eq!(Direction::Out.as_str(), "OUT");
        assert_eq!(format!("{}", Direction::Out), "OUT");
    }
}
