//! Session identity and snapshot types.

use chrono::{DateTime, Utc};
use std::fmt;

/// Unique identifier for a client session.
///
/// Allocated sequentially by the listener from a process-wide counter;
/// never reused within a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a SessionId from a raw counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw counter value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Read-only snapshot of one session's registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,

    /// Remote address in display form
    pub peer: String,

    /// Username, once authenticated
    pub username: Option<String>,

    /// Whether the session has authenticated
    pub authorized: bool,

    /// Whether the session receives forwarded packets
    pub forwarding: bool,

    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Display identity for logs: `user@addr` once authenticated,
    /// the bare address before that.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.peer),
            None => self.peer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new(42);
        assert_eq!(format!("{id}"), "42");
        assert_eq!(id.as_u64(), 42);
    }

    #[test]
    fn test_display_name_before_and_after_login() {
        let mut info = SessionInfo {
            id: SessionId::new(1),
            peer: "127.0.0.1:50000".to_string(),
            username: None,
            authorized: false,
            forwarding: false,
            connected_at: Utc::now(),
        };
        assert_eq!(info.display_name(), "127.0.0.1:50000");

        info.username = Some("alice".to_string());
        info.authorized = true;
        assert_eq!(info.display_name(), "alice@127.0.0.1:50000");
    }
}
