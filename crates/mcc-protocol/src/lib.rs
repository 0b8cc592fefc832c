//! MCC Protocol - Client wire protocol
//!
//! The text protocol spoken between operator clients and the relay
//! daemon: newline-delimited commands in, `OK`/`FAIL` responses and
//! `PACKET` frames out.

pub mod command;
pub mod response;

pub use command::{parse_line, Command, CommandError, CommandVerb, ParsedLine};
