//! Per-connection protocol state machine.
//!
//! Each session runs two tasks over one socket:
//!
//! - the command reader (this module's [`Session::run`]), which owns the
//!   read half and processes one line at a time, and
//! - the mailbox writer, which drains the session's packet mailbox and
//!   writes `PACKET` frames.
//!
//! Both sides write through the same [`SessionWriter`] lock, so response
//! lines and packet frames never interleave. The shared cancellation
//! token ends both tasks: the server cancels it on shutdown, and the
//! writer cancels it when the socket dies under it.

use std::sync::Arc;
use std::time::Duration;

use mcc_core::{Packet, SessionId, EPHEMERAL_PORT_MIN};
use mcc_protocol::command::{self, Command, CommandVerb, ParsedLine};
use mcc_protocol::response;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{RegistryError, RegistryHandle, RemovalReason};
use crate::server::BoxedStream;
use crate::storage::{digest_password, Storage};
use crate::telemetry::TelemetryPort;

/// Longest accepted command line, including the newline.
const MAX_LINE_LEN: usize = 8192;

/// Timeout for a single socket write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay inserted before every failed-login response.
const LOGIN_FAILURE_DELAY: Duration = Duration::from_secs(1);

/// Consecutive failed logins that end the session.
const MAX_LOGIN_FAILURES: u32 = 3;

/// How long a SEND may wait for space in the outbound queue.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Write half of a session socket, shared by the command path and the
/// mailbox writer task.
pub(crate) type SessionWriter = Arc<Mutex<BufWriter<WriteHalf<BoxedStream>>>>;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that terminate a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Socket read or write failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Socket write did not complete within [`WRITE_TIMEOUT`]
    #[error("write timed out")]
    WriteTimeout,

    /// Client sent a line over the protocol cap
    #[error("line too long: {length} bytes (max {max})")]
    LineTooLong { length: usize, max: usize },

    /// The session's own mailbox receiver is gone
    #[error("session mailbox closed")]
    MailboxClosed,

    /// Registry actor unreachable
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ============================================================================
// Shared Backends
// ============================================================================

/// Handles a session needs from the rest of the server.
///
/// Built once by the listener and cloned per connection.
#[derive(Clone)]
pub(crate) struct SessionBackends {
    pub registry: RegistryHandle,
    pub storage: Arc<dyn Storage>,
    pub link: Arc<dyn TelemetryPort>,
    /// Node address stamped onto uplink packets.
    pub local_node: u8,
}

// ============================================================================
// Session
// ============================================================================

/// One connected client and its protocol state.
pub(crate) struct Session {
    id: SessionId,
    peer: String,
    reader: BufReader<ReadHalf<BoxedStream>>,
    writer: SessionWriter,
    /// Sender half of this session's own mailbox, used to queue replayed
    /// history behind live traffic.
    mailbox_tx: mpsc::Sender<Packet>,
    registry: RegistryHandle,
    storage: Arc<dyn Storage>,
    link: Arc<dyn TelemetryPort>,
    local_node: u8,
    cancel: CancellationToken,
    authorized: bool,
    failed_logins: u32,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        peer: String,
        stream: BoxedStream,
        mailbox_tx: mpsc::Sender<Packet>,
        backends: SessionBackends,
        cancel: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        Self {
            id,
            peer,
            reader: BufReader::new(read_half),
            writer: Arc::new(Mutex::new(BufWriter::new(write_half))),
            mailbox_tx,
            registry: backends.registry,
            storage: backends.storage,
            link: backends.link,
            local_node: backends.local_node,
            cancel,
            authorized: false,
            failed_logins: 0,
        }
    }

    /// Drives the session to completion and removes it from the registry.
    ///
    /// `users` is the registry count at admission (including this
    /// session), interpolated into the greeting. `mailbox` is the
    /// receiver half matching the sender registered at admission.
    pub(crate) async fn run(mut self, users: usize, mailbox: mpsc::Receiver<Packet>) {
        let writer_task = spawn_mailbox_writer(
            Arc::clone(&self.writer),
            mailbox,
            self.cancel.clone(),
            self.peer.clone(),
        );

        let reason = match self.serve(users).await {
            Ok(reason) => reason,
            Err(SessionError::LineTooLong { length, max }) => {
                warn!(
                    peer = %self.peer,
                    length,
                    max,
                    "Oversized command line, closing session"
                );
                RemovalReason::Disconnected
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Session ended with error");
                RemovalReason::Disconnected
            }
        };

        self.cancel.cancel();
        let writer_failed = writer_task.await.unwrap_or(true);

        // A writer failure cancels the shared token, which the read loop
        // reports as a shutdown. Restore the real reason.
        let reason = if writer_failed && reason == RemovalReason::Shutdown {
            RemovalReason::Disconnected
        } else {
            reason
        };

        if let Err(e) = self.registry.remove(self.id, reason).await {
            debug!(peer = %self.peer, error = %e, "Registry removal failed");
        }
    }

    /// Greets the client, then reads and resolves one command at a time
    /// until something ends the session.
    async fn serve(&mut self, users: usize) -> Result<RemovalReason, SessionError> {
        self.send_line(&response::greeting(env!("CARGO_PKG_VERSION"), users))
            .await?;

        let mut line = String::new();
        loop {
            line.clear();

            let bytes_read = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(RemovalReason::Shutdown),
                result = self.reader.read_line(&mut line) => {
                    result.map_err(|e| SessionError::Io(e.to_string()))?
                }
            };

            if bytes_read == 0 {
                debug!(peer = %self.peer, "Client closed connection");
                return Ok(RemovalReason::Disconnected);
            }
            if line.len() > MAX_LINE_LEN {
                return Err(SessionError::LineTooLong {
                    length: line.len(),
                    max: MAX_LINE_LEN,
                });
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if let Some(reason) = self.handle_line(trimmed).await? {
                return Ok(reason);
            }
        }
    }

    /// Resolves one input line, writing the response inline.
    ///
    /// Returns `Some(reason)` when the line ends the session.
    async fn handle_line(&mut self, line: &str) -> Result<Option<RemovalReason>, SessionError> {
        let (verb, args) = match command::parse_line(line) {
            // Blank lines are skipped without a response.
            ParsedLine::Empty => return Ok(None),
            ParsedLine::Unknown { keyword } => {
                debug!(peer = %self.peer, keyword = %keyword, "Unknown command");
                self.send_line(&response::unknown_command(&keyword)).await?;
                return Ok(None);
            }
            ParsedLine::Request { verb, args } => (verb, args),
        };

        // Authorization gates the verb before its arguments are looked at.
        if verb.requires_login() && !self.authorized {
            self.send_line(&response::login_first(verb)).await?;
            return Ok(None);
        }

        let cmd = match Command::from_args(verb, &args) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Malformed command");
                self.send_line(&response::invalid_format(verb)).await?;
                return Ok(None);
            }
        };

        match cmd {
            Command::User { username, password } => self.handle_user(username, password).await,
            Command::Send {
                dest,
                dport,
                payload,
            } => {
                self.handle_send(dest, dport, payload).await?;
                Ok(None)
            }
            Command::Replay { count } => {
                self.handle_replay(count).await?;
                Ok(None)
            }
            Command::Start => {
                self.registry.set_forwarding(self.id, true).await?;
                self.send_line(&response::forwarding_started()).await?;
                debug!(peer = %self.peer, "Forwarding enabled");
                Ok(None)
            }
            Command::Stop => {
                self.registry.set_forwarding(self.id, false).await?;
                self.send_line(&response::forwarding_stopped()).await?;
                debug!(peer = %self.peer, "Forwarding disabled");
                Ok(None)
            }
            Command::Quit => {
                self.send_line(&response::closing()).await?;
                Ok(Some(RemovalReason::ClientQuit))
            }
        }
    }

    /// Checks credentials against storage.
    ///
    /// The client-supplied password is digested here; storage only ever
    /// sees the hex digest. A storage failure is logged and treated as a
    /// bad login rather than disconnecting the client.
    async fn handle_user(
        &mut self,
        username: String,
        password: String,
    ) -> Result<Option<RemovalReason>, SessionError> {
        let digest = digest_password(&password);
        let valid = match self
            .storage
            .validate_credentials(&username, &digest)
            .await
        {
            Ok(valid) => valid,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Credential check failed");
                false
            }
        };

        if valid {
            self.failed_logins = 0;
            self.authorized = true;
            self.registry
                .set_authorized(self.id, username.clone())
                .await?;
            self.send_line(&response::welcome(&username)).await?;
            info!(peer = %self.peer, user = %username, "Login succeeded");
            return Ok(None);
        }

        // The fixed delay slows down credential guessing.
        tokio::time::sleep(LOGIN_FAILURE_DELAY).await;
        self.send_line(&response::bad_credentials()).await?;
        self.failed_logins += 1;

        if self.failed_logins >= MAX_LOGIN_FAILURES {
            warn!(
                peer = %self.peer,
                attempts = self.failed_logins,
                "Too many failed logins"
            );
            self.send_line(&response::too_many_failures()).await?;
            return Ok(Some(RemovalReason::LoginFailures));
        }

        Ok(None)
    }

    /// Stamps and submits an uplink packet.
    async fn handle_send(
        &mut self,
        dest: u8,
        dport: u8,
        payload: Vec<u8>,
    ) -> Result<(), SessionError> {
        let packet = match Packet::new(self.local_node, EPHEMERAL_PORT_MIN, dest, dport, payload) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Rejected uplink packet");
                return self
                    .send_line(&response::invalid_format(CommandVerb::Send))
                    .await;
            }
        };

        match self.link.try_submit_outbound(packet, SUBMIT_TIMEOUT).await {
            Ok(()) => self.send_line(&response::packet_sent()).await,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Outbound submission failed");
                self.send_line(&response::queue_full()).await
            }
        }
    }

    /// Queues up to `count` stored inbound packets for delivery.
    ///
    /// History rides the session mailbox like live traffic; the awaited
    /// send blocks instead of dropping replayed frames when the mailbox
    /// is full.
    async fn handle_replay(&mut self, count: u32) -> Result<(), SessionError> {
        let packets = match self.storage.recent_inbound(count as usize).await {
            Ok(packets) => packets,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "History lookup failed");
                Vec::new()
            }
        };

        self.send_line(&response::replaying(packets.len())).await?;
        for packet in packets {
            self.mailbox_tx
                .send(packet)
                .await
                .map_err(|_| SessionError::MailboxClosed)?;
        }
        Ok(())
    }

    async fn send_line(&self, line: &str) -> Result<(), SessionError> {
        write_line(&self.writer, line).await
    }
}

// ============================================================================
// Socket Writing
// ============================================================================

/// Writes one line plus the terminating newline under the write timeout.
pub(crate) async fn write_line(writer: &SessionWriter, line: &str) -> Result<(), SessionError> {
    let mut guard = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

/// Spawns the mailbox writer task for one session.
///
/// Returns `true` from the task when delivery failed; the task cancels
/// the session token itself in that case so the read loop unblocks.
fn spawn_mailbox_writer(
    writer: SessionWriter,
    mut mailbox: mpsc::Receiver<Packet>,
    cancel: CancellationToken,
    peer: String,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => return false,
                maybe = mailbox.recv() => match maybe {
                    Some(packet) => packet,
                    None => return false,
                },
            };

            if let Err(e) = write_line(&writer, &response::packet_frame(&packet)).await {
                debug!(peer = %peer, error = %e, "Packet delivery failed");
                // A dead write side ends the whole session.
                cancel.cancel();
                return true;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn writer_for(stream: tokio::io::DuplexStream) -> SessionWriter {
        let boxed: BoxedStream = Box::new(stream);
        let (_read_half, write_half) = tokio::io::split(boxed);
        Arc::new(Mutex::new(BufWriter::new(write_half)))
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (server_side, mut client_side) = tokio::io::duplex(256);
        let writer = writer_for(server_side);

        write_line(&writer, "SEND OK Packet sent").await.unwrap();

        let mut received = vec![0u8; 20];
        client_side.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"SEND OK Packet sent\n");
    }

    #[tokio::test]
    async fn write_line_reports_io_error_on_closed_peer() {
        let (server_side, client_side) = tokio::io::duplex(256);
        let writer = writer_for(server_side);
        drop(client_side);

        let result = write_line(&writer, "hello").await;
        assert!(matches!(result, Err(SessionError::Io(_))));
    }

    #[tokio::test]
    async fn mailbox_writer_stops_on_cancel() {
        let (server_side, _client_side) = tokio::io::duplex(256);
        let writer = writer_for(server_side);
        let (_mailbox_tx, mailbox_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = spawn_mailbox_writer(writer, mailbox_rx, cancel.clone(), "test".to_string());
        cancel.cancel();

        let failed = task.await.unwrap();
        assert!(!failed);
    }

    #[test]
    fn line_too_long_mentions_both_sizes() {
        let e = SessionError::LineTooLong {
            length: 9000,
            max: MAX_LINE_LEN,
        };
        assert_eq!(e.to_string(), "line too long: 9000 bytes (max 8192)");
    }
}
