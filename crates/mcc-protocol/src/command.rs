//! Client command parsing.
//!
//! Parsing happens in two stages so the caller can check authorization
//! between them: [`parse_line`] identifies the command verb, and
//! [`Command::from_args`] validates the arguments. An unauthorized
//! request is rejected on the verb alone, before its arguments are
//! looked at.

use mcc_core::packet::{MAX_PAYLOAD_LEN, NODE_MAX, PORT_MAX};
use std::fmt;
use thiserror::Error;

/// Command keywords understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandVerb {
    User,
    Send,
    Replay,
    Start,
    Stop,
    Quit,
}

impl CommandVerb {
    /// Looks up a verb by keyword, case-insensitively.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        const VERBS: [CommandVerb; 6] = [
            CommandVerb::User,
            CommandVerb::Send,
            CommandVerb::Replay,
            CommandVerb::Start,
            CommandVerb::Stop,
            CommandVerb::Quit,
        ];
        VERBS
            .into_iter()
            .find(|verb| keyword.eq_ignore_ascii_case(verb.keyword()))
    }

    /// Canonical keyword for this verb.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Send => "SEND",
            Self::Replay => "REPLAY",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Quit => "QUIT",
        }
    }

    /// True for verbs that require a prior successful login.
    pub fn requires_login(&self) -> bool {
        match self {
            Self::Send | Self::Replay | Self::Start | Self::Stop => true,
            Self::User | Self::Quit => false,
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// One tokenized input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Line with no tokens; skipped by the server.
    Empty,

    /// First token is not a known verb. The keyword is uppercased for
    /// the error response.
    Unknown { keyword: String },

    /// A known verb and its raw arguments, not yet validated.
    Request { verb: CommandVerb, args: Vec<String> },
}

/// Tokenizes an input line on whitespace and identifies the verb.
pub fn parse_line(line: &str) -> ParsedLine {
    let mut tokens = line.split_whitespace();
    let Some(keyword) = tokens.next() else {
        return ParsedLine::Empty;
    };
    let args: Vec<String> = tokens.map(str::to_string).collect();
    match CommandVerb::from_keyword(keyword) {
        Some(verb) => ParsedLine::Request { verb, args },
        None => ParsedLine::Unknown {
            keyword: keyword.to_ascii_uppercase(),
        },
    }
}

/// A fully validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate with a username and password.
    User { username: String, password: String },

    /// Submit a packet for uplink.
    Send {
        dest: u8,
        dport: u8,
        payload: Vec<u8>,
    },

    /// Request the last `count` inbound packets.
    Replay { count: u32 },

    /// Enable packet forwarding to this session.
    Start,

    /// Disable packet forwarding to this session.
    Stop,

    /// Close the connection.
    Quit,
}

/// Argument validation failures.
///
/// All of these answer `FAIL Invalid format` on the wire; the variants
/// exist so logs can say what was actually wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("wrong argument count for {verb}: expected {expected}, got {got}")]
    WrongArity {
        verb: CommandVerb,
        expected: usize,
        got: usize,
    },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid replay count '{0}'")]
    InvalidCount(String),
}

impl Command {
    /// Validates the arguments for a verb.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing the first problem found;
    /// the wire response for every variant is `FAIL Invalid format`.
    pub fn from_args(verb: CommandVerb, args: &[String]) -> Result<Self, CommandError> {
        match verb {
            CommandVerb::User => match args {
                [username, password] => Ok(Self::User {
                    username: username.clone(),
                    password: password.clone(),
                }),
                _ => Err(CommandError::WrongArity {
                    verb,
                    expected: 2,
                    got: args.len(),
                }),
            },
            CommandVerb::Send => match args {
                [address, payload] => {
                    let (dest, dport) = parse_destination(address)?;
                    let payload = parse_payload(payload)?;
                    Ok(Self::Send {
                        dest,
                        dport,
                        payload,
                    })
                }
                _ => Err(CommandError::WrongArity {
                    verb,
                    expected: 2,
                    got: args.len(),
                }),
            },
            CommandVerb::Replay => match args {
                [count] => Ok(Self::Replay {
                    count: parse_count(count)?,
                }),
                _ => Err(CommandError::WrongArity {
                    verb,
                    expected: 1,
                    got: args.len(),
                }),
            },
            // Trailing arguments to the bare verbs are ignored.
            CommandVerb::Start => Ok(Self::Start),
            CommandVerb::Stop => Ok(Self::Stop),
            CommandVerb::Quit => Ok(Self::Quit),
        }
    }

    /// The verb this command was parsed from.
    pub fn verb(&self) -> CommandVerb {
        match self {
            Self::User { .. } => CommandVerb::User,
            Self::Send { .. } => CommandVerb::Send,
            Self::Replay { .. } => CommandVerb::Replay,
            Self::Start => CommandVerb::Start,
            Self::Stop => CommandVerb::Stop,
            Self::Quit => CommandVerb::Quit,
        }
    }
}

/// Parses a `node:port` destination.
///
/// Each component is at most two decimal digits: node 0-31, port 0-63.
fn parse_destination(text: &str) -> Result<(u8, u8), CommandError> {
    let invalid = || CommandError::InvalidAddress(text.to_string());
    let (node, port) = text.split_once(':').ok_or_else(invalid)?;
    let node = parse_component(node, NODE_MAX).ok_or_else(invalid)?;
    let port = parse_component(port, PORT_MAX).ok_or_else(invalid)?;
    Ok((node, port))
}

fn parse_component(text: &str, max: u8) -> Option<u8> {
    if text.is_empty() || text.len() > 2 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = text.parse::<u8>().ok()?;
    (value <= max).then_some(value)
}

/// Parses a payload of 1-256 lowercase hex byte pairs.
fn parse_payload(text: &str) -> Result<Vec<u8>, CommandError> {
    if text.is_empty() {
        return Err(CommandError::InvalidPayload("empty payload".to_string()));
    }
    if text.len() % 2 != 0 {
        return Err(CommandError::InvalidPayload(
            "odd hex digit count".to_string(),
        ));
    }
    if text.len() > MAX_PAYLOAD_LEN * 2 {
        return Err(CommandError::InvalidPayload(format!(
            "{} bytes exceeds maximum of {MAX_PAYLOAD_LEN}",
            text.len() / 2
        )));
    }
    if !text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(CommandError::InvalidPayload(
            "payload must be lowercase hex".to_string(),
        ));
    }
    hex::decode(text).map_err(|e| CommandError::InvalidPayload(e.to_string()))
}

/// Parses a replay count: decimal digits only, within u32 range.
fn parse_count(text: &str) -> Result<u32, CommandError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommandError::InvalidCount(text.to_string()));
    }
    text.parse::<u32>()
        .map_err(|_| CommandError::InvalidCount(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: &str) -> (CommandVerb, Vec<String>) {
        match parse_line(line) {
            ParsedLine::Request { verb, args } => (verb, args),
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_line_empty_and_whitespace() {
        assert_eq!(parse_line(""), ParsedLine::Empty);
        assert_eq!(parse_line("   \t  "), ParsedLine::Empty);
    }

    #[test]
    fn test_parse_line_case_insensitive_verb() {
        let (verb, args) = request("user alice s3cr3t");
        assert_eq!(verb, CommandVerb::User);
        assert_eq!(args, vec!["alice", "s3cr3t"]);

        let (verb, _) = request("QuIt");
        assert_eq!(verb, CommandVerb::Quit);
    }

    #[test]
    fn test_parse_line_unknown_keyword_uppercased() {
        assert_eq!(
            parse_line("hello world"),
            ParsedLine::Unknown {
                keyword: "HELLO".to_string()
            }
        );
    }

    #[test]
    fn test_requires_login() {
        assert!(!CommandVerb::User.requires_login());
        assert!(!CommandVerb::Quit.requires_login());
        assert!(CommandVerb::Send.requires_login());
        assert!(CommandVerb::Replay.requires_login());
        assert!(CommandVerb::Start.requires_login());
        assert!(CommandVerb::Stop.requires_login());
    }

    #[test]
    fn test_user_requires_exactly_two_args() {
        let (verb, args) = request("USER alice");
        assert!(matches!(
            Command::from_args(verb, &args),
            Err(CommandError::WrongArity { got: 1, .. })
        ));

        let (verb, args) = request("USER alice pass extra");
        assert!(matches!(
            Command::from_args(verb, &args),
            Err(CommandError::WrongArity { got: 3, .. })
        ));

        let (verb, args) = request("USER alice s3cr3t");
        assert_eq!(
            Command::from_args(verb, &args).unwrap(),
            Command::User {
                username: "alice".to_string(),
                password: "s3cr3t".to_string()
            }
        );
    }

    #[test]
    fn test_send_accepts_boundary_addresses() {
        let (verb, args) = request("SEND 31:63 0a");
        assert_eq!(
            Command::from_args(verb, &args).unwrap(),
            Command::Send {
                dest: 31,
                dport: 63,
                payload: vec![0x0a]
            }
        );

        let (verb, args) = request("SEND 0:0 ff");
        assert!(Command::from_args(verb, &args).is_ok());
    }

    #[test]
    fn test_send_rejects_out_of_range_addresses() {
        for line in ["SEND 32:10 0a", "SEND 5:64 0a", "SEND 99:99 0a"] {
            let (verb, args) = request(line);
            assert!(
                matches!(
                    Command::from_args(verb, &args),
                    Err(CommandError::InvalidAddress(_))
                ),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn test_send_rejects_malformed_addresses() {
        for line in [
            "SEND 5 0a",       // no colon
            "SEND 005:10 0a",  // three digits
            "SEND 5:010 0a",   // three digits
            "SEND :10 0a",     // empty node
            "SEND 5: 0a",      // empty port
            "SEND a:b 0a",     // not digits
            "SEND -1:10 0a",   // sign
        ] {
            let (verb, args) = request(line);
            assert!(
                Command::from_args(verb, &args).is_err(),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn test_send_accepts_leading_zero_addresses() {
        // Two digits with a leading zero are still two digits
        let (verb, args) = request("SEND 05:09 0a");
        assert_eq!(
            Command::from_args(verb, &args).unwrap(),
            Command::Send {
                dest: 5,
                dport: 9,
                payload: vec![0x0a]
            }
        );
    }

    #[test]
    fn test_send_payload_grammar() {
        // Uppercase hex is rejected
        let (verb, args) = request("SEND 5:10 0A1B");
        assert!(matches!(
            Command::from_args(verb, &args),
            Err(CommandError::InvalidPayload(_))
        ));

        // Odd digit count
        let (verb, args) = request("SEND 5:10 abc");
        assert!(Command::from_args(verb, &args).is_err());

        // Non-hex characters
        let (verb, args) = request("SEND 5:10 zz");
        assert!(Command::from_args(verb, &args).is_err());
    }

    #[test]
    fn test_send_payload_length_limits() {
        let max = "ab".repeat(256);
        let (verb, args) = request(&format!("SEND 5:10 {max}"));
        match Command::from_args(verb, &args).unwrap() {
            Command::Send { payload, .. } => assert_eq!(payload.len(), 256),
            other => panic!("unexpected command {other:?}"),
        }

        let over = "ab".repeat(257);
        let (verb, args) = request(&format!("SEND 5:10 {over}"));
        assert!(Command::from_args(verb, &args).is_err());
    }

    #[test]
    fn test_send_requires_exactly_two_args() {
        let (verb, args) = request("SEND 5:10");
        assert!(matches!(
            Command::from_args(verb, &args),
            Err(CommandError::WrongArity { got: 1, .. })
        ));

        let (verb, args) = request("SEND 5:10 0a 0b");
        assert!(Command::from_args(verb, &args).is_err());
    }

    #[test]
    fn test_replay_count_grammar() {
        let (verb, args) = request("REPLAY 0");
        assert_eq!(
            Command::from_args(verb, &args).unwrap(),
            Command::Replay { count: 0 }
        );

        // Leading zeros are plain decimal
        let (verb, args) = request("REPLAY 007");
        assert_eq!(
            Command::from_args(verb, &args).unwrap(),
            Command::Replay { count: 7 }
        );

        for bad in ["REPLAY abc", "REPLAY -1", "REPLAY 1.5", "REPLAY +2"] {
            let (verb, args) = request(bad);
            assert!(
                Command::from_args(verb, &args).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_replay_count_overflow_is_invalid() {
        let (verb, args) = request("REPLAY 99999999999999999999");
        assert!(matches!(
            Command::from_args(verb, &args),
            Err(CommandError::InvalidCount(_))
        ));
    }

    #[test]
    fn test_bare_verbs_ignore_trailing_args() {
        let (verb, args) = request("START now please");
        assert_eq!(Command::from_args(verb, &args).unwrap(), Command::Start);

        let (verb, args) = request("STOP");
        assert_eq!(Command::from_args(verb, &args).unwrap(), Command::Stop);

        let (verb, args) = request("QUIT bye");
        assert_eq!(Command::from_args(verb, &args).unwrap(), Command::Quit);
    }

    #[test]
    fn test_command_verb_round_trip() {
        for keyword in ["USER", "SEND", "REPLAY", "START", "STOP", "QUIT"] {
            let verb = CommandVerb::from_keyword(keyword).unwrap();
            assert_eq!(verb.keyword(), keyword);
            assert_eq!(format!("{verb}"), keyword);
        }
        assert!(CommandVerb::from_keyword("NOPE").is_none());
    }
}
