//! Domain error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur constructing or decoding packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Node address outside the 5-bit space
    #[error("Invalid node {0} (expected 0-31)")]
    InvalidNode(u8),

    /// Port outside the 6-bit space
    #[error("Invalid port {0} (expected 0-63)")]
    InvalidPort(u8),

    /// Payload longer than a frame allows
    #[error("Payload of {0} bytes exceeds maximum of 256")]
    PayloadTooLong(usize),

    /// Wire text that does not parse as a packet frame
    #[error("Malformed packet frame: {reason}")]
    MalformedFrame { reason: String },
}

impl PacketError {
    /// Creates a MalformedFrame error from any displayable reason.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }
}

/// Result type for packet operations.
pub type PacketResult<T> = Result<T, PacketError>;
