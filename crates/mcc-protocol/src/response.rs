//! Server response lines.
//!
//! Builders for every line the server writes. None of them include the
//! trailing newline; the connection writer appends it.

use crate::command::CommandVerb;
use mcc_core::packet::Packet;

/// Server identity announced in the greeting.
pub const SERVER_IDENTITY: &str = "MCC Server";

/// Generic success response: `VERB OK message`.
pub fn ok(verb: CommandVerb, message: &str) -> String {
    format!("{verb} OK {message}")
}

/// Generic failure response: `VERB FAIL message`.
pub fn fail(verb: CommandVerb, message: &str) -> String {
    format!("{verb} FAIL {message}")
}

/// Greeting sent once per connection, before any command.
///
/// `users` is the number of connected sessions including the one being
/// greeted, so it is always at least 1.
pub fn greeting(version: &str, users: usize) -> String {
    let noun = if users == 1 { "user" } else { "users" };
    format!("* OK {SERVER_IDENTITY} {version} ready ({users} {noun} connected)")
}

/// Rejection written to a connection over capacity, in place of the
/// greeting.
pub fn too_many_users() -> String {
    "Too many users connected. Try again later".to_string()
}

/// Successful login.
pub fn welcome(username: &str) -> String {
    ok(CommandVerb::User, &format!("Welcome {username}"))
}

/// Login with a wrong username or password.
pub fn bad_credentials() -> String {
    fail(CommandVerb::User, "Invalid username or password")
}

/// Server notice before disconnecting a session that failed to log in
/// three times in a row.
pub fn too_many_failures() -> String {
    "* FAIL Too many failed login attempts".to_string()
}

/// Command whose arguments did not validate.
pub fn invalid_format(verb: CommandVerb) -> String {
    fail(verb, "Invalid format")
}

/// Command that requires a login, from an unauthenticated session.
pub fn login_first(verb: CommandVerb) -> String {
    fail(verb, "Please login first")
}

/// Packet accepted for uplink.
pub fn packet_sent() -> String {
    ok(CommandVerb::Send, "Packet sent")
}

/// Outbound queue saturated.
pub fn queue_full() -> String {
    fail(CommandVerb::Send, "Unable to add packet to outgoing queue")
}

/// Replay about to deliver `count` packet frames.
pub fn replaying(count: usize) -> String {
    ok(CommandVerb::Replay, &format!("Replaying {count} packets"))
}

/// Forwarding enabled.
pub fn forwarding_started() -> String {
    ok(CommandVerb::Start, "Packet forwarding started")
}

/// Forwarding disabled.
pub fn forwarding_stopped() -> String {
    ok(CommandVerb::Stop, "Packet forwarding stopped")
}

/// Acknowledgement before the server closes the connection.
pub fn closing() -> String {
    ok(CommandVerb::Quit, "Closing connection")
}

/// First token of the line was not a known command.
pub fn unknown_command(keyword: &str) -> String {
    format!("* FAIL Invalid command '{keyword}'")
}

/// Broadcast or replay frame carrying one packet.
pub fn packet_frame(packet: &Packet) -> String {
    format!("PACKET {}", packet.to_wire())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_singular_and_plural() {
        assert_eq!(
            greeting("0.8.0", 1),
            "* OK MCC Server 0.8.0 ready (1 user connected)"
        );
        assert_eq!(
            greeting("0.8.0", 3),
            "* OK MCC Server 0.8.0 ready (3 users connected)"
        );
    }

    #[test]
    fn test_login_responses() {
        assert_eq!(welcome("alice"), "USER OK Welcome alice");
        assert_eq!(bad_credentials(), "USER FAIL Invalid username or password");
        assert_eq!(
            too_many_failures(),
            "* FAIL Too many failed login attempts"
        );
    }

    #[test]
    fn test_command_responses() {
        assert_eq!(packet_sent(), "SEND OK Packet sent");
        assert_eq!(
            queue_full(),
            "SEND FAIL Unable to add packet to outgoing queue"
        );
        assert_eq!(replaying(1), "REPLAY OK Replaying 1 packets");
        assert_eq!(forwarding_started(), "START OK Packet forwarding started");
        assert_eq!(forwarding_stopped(), "STOP OK Packet forwarding stopped");
        assert_eq!(closing(), "QUIT OK Closing connection");
    }

    #[test]
    fn test_failure_responses_carry_the_verb() {
        assert_eq!(invalid_format(CommandVerb::Send), "SEND FAIL Invalid format");
        assert_eq!(
            login_first(CommandVerb::Replay),
            "REPLAY FAIL Please login first"
        );
        assert_eq!(unknown_command("HELLO"), "* FAIL Invalid command 'HELLO'");
    }

    #[test]
    fn test_admission_rejection() {
        assert_eq!(too_many_users(), "Too many users connected. Try again later");
    }

    #[test]
    fn test_packet_frame() {
        let packet = Packet::from_parts(3, 12, 1, 20, vec![0xaa, 0xbb, 0xcc], 99).unwrap();
        assert_eq!(packet_frame(&packet), "PACKET 3:12 1:20 aabbcc 99");
    }
}
