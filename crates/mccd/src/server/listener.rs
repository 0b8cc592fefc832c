//! TCP listener and connection admission.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufWriter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mcc_core::{Config, SessionId};
use mcc_protocol::response;

use crate::distributor::Distributor;
use crate::registry::{RegistryError, RegistryHandle, SessionEvent};
use crate::storage::Storage;
use crate::telemetry::TelemetryPort;

use super::session::{write_line, Session, SessionBackends, SessionWriter};
use super::tls::{build_acceptor, TlsError};
use super::{BoxedStream, MAILBOX_CAPACITY};

/// Ceiling on the per-connection TLS handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for sessions to close themselves.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP front end of the relay.
///
/// Owns the listening socket and spawns one task per accepted
/// connection. Shutdown runs in phases once the server token fires:
/// stop accepting, stop the packet distributor, cancel the sessions and
/// wait for the registry to drain, release the socket.
pub struct RelayServer {
    listener: TcpListener,

    /// Address actually bound, resolved at bind time.
    local_addr: SocketAddr,

    /// TLS handshaker; `None` runs plaintext.
    tls: Option<TlsAcceptor>,

    /// Handles cloned into every session.
    backends: SessionBackends,

    /// Server-wide shutdown token.
    cancel_token: CancellationToken,

    /// Monotonic source of session ids.
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listening socket and prepares TLS.
    ///
    /// Prefers a dual-stack `[::]` bind so IPv4 peers arrive as mapped
    /// addresses; hosts without IPv6 fall back to `0.0.0.0`.
    ///
    /// # Errors
    ///
    /// Returns an error when the port cannot be bound or the configured
    /// TLS material cannot be loaded.
    pub async fn bind(
        config: &Config,
        registry: RegistryHandle,
        storage: Arc<dyn Storage>,
        link: Arc<dyn TelemetryPort>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let tls = if config.server.tls {
            Some(build_acceptor(
                &config.server.cert_file,
                &config.server.key_file,
            )?)
        } else {
            None
        };

        let port = config.server.port;
        let listener = match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                debug!(error = %e, "Dual-stack bind failed, trying IPv4 only");
                TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
                    .await
                    .map_err(|e| ServerError::Bind {
                        port,
                        error: e.to_string(),
                    })?
            }
        };
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            port,
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            tls,
            backends: SessionBackends {
                registry,
                storage,
                link,
                local_node: config.link.node,
            },
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Address the server is listening on.
    ///
    /// With a configured port of 0 this carries the port the OS picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the server until the shutdown token fires.
    ///
    /// This method does not return until shutdown completes.
    pub async fn run(self) {
        info!(addr = %self.local_addr, "Relay server listening");

        let distributor_cancel = CancellationToken::new();
        let distributor = Distributor::new(
            self.backends.registry.clone(),
            Arc::clone(&self.backends.link),
            self.backends.local_node,
            distributor_cancel.clone(),
        );
        let distributor_task = tokio::spawn(distributor.run());

        // Sessions get children of this token, not of the server token,
        // so shutdown can sequence the accept loop, the distributor, and
        // the sessions separately.
        let sessions_cancel = CancellationToken::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            let peer = canonical_peer(addr);
                            debug!(peer = %peer, "Connection opened");

                            tokio::spawn(handle_connection(
                                stream,
                                peer,
                                SessionId::new(conn_num),
                                self.tls.clone(),
                                self.backends.clone(),
                                sessions_cancel.child_token(),
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        // Distributor first: nothing new should land in session
        // mailboxes while they drain.
        distributor_cancel.cancel();
        if distributor_task.await.is_err() {
            warn!("Distributor task ended abnormally");
        }

        self.drain_sessions(sessions_cancel).await;
        info!("Server stopped");
    }

    /// Cancels every session and waits for the registry to empty.
    ///
    /// Sessions that outlive [`DRAIN_TIMEOUT`] are logged and abandoned;
    /// their tasks die with the process.
    async fn drain_sessions(&self, sessions_cancel: CancellationToken) {
        let registry = &self.backends.registry;

        // Subscribe before cancelling so no removal goes unseen.
        let mut events = registry.subscribe();
        sessions_cancel.cancel();

        let mut remaining = registry.count().await;
        if remaining == 0 {
            return;
        }
        debug!(sessions = remaining, "Waiting for sessions to close");

        let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
        tokio::pin!(deadline);

        while remaining > 0 {
            tokio::select! {
                _ = &mut deadline => {
                    let stragglers: Vec<String> = registry
                        .sessions()
                        .await
                        .iter()
                        .map(|info| info.display_name())
                        .collect();
                    warn!(
                        sessions = remaining,
                        stragglers = ?stragglers,
                        "Sessions still open after drain deadline"
                    );
                    return;
                }

                event = events.recv() => match event {
                    Ok(SessionEvent::Removed { remaining: left, .. }) => remaining = left,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Missed registry events, re-reading count");
                        remaining = registry.count().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }
}

/// Runs one accepted connection to completion.
///
/// Performs the TLS handshake when configured, asks the registry for
/// admission, then hands the stream to a [`Session`]. Every exit path
/// before admission closes the socket without registry traffic.
async fn handle_connection(
    stream: TcpStream,
    peer: String,
    id: SessionId,
    tls: Option<TlsAcceptor>,
    backends: SessionBackends,
    cancel: CancellationToken,
) {
    let stream: BoxedStream = match tls {
        Some(acceptor) => match timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => Box::new(tls_stream),
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
            Err(_) => {
                warn!(peer = %peer, "TLS handshake timed out");
                return;
            }
        },
        None => Box::new(stream),
    };

    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);

    let users = match backends
        .registry
        .admit(id, peer.clone(), mailbox_tx.clone())
        .await
    {
        Ok(users) => users,
        Err(RegistryError::AtCapacity { max }) => {
            warn!(peer = %peer, max, "Connection rejected, server full");
            reject(stream, &peer).await;
            return;
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Admission failed");
            return;
        }
    };

    info!(peer = %peer, users, "Accepted connection");

    let session = Session::new(id, peer, stream, mailbox_tx, backends, cancel);
    session.run(users, mailbox_rx).await;
}

/// Tells a rejected client why before the socket closes.
async fn reject(stream: BoxedStream, peer: &str) {
    let (_read_half, write_half) = tokio::io::split(stream);
    let writer: SessionWriter = Arc::new(Mutex::new(BufWriter::new(write_half)));

    if let Err(e) = write_line(&writer, &response::too_many_users()).await {
        debug!(peer = %peer, error = %e, "Rejection notice failed");
    }
}

/// Formats a peer address, folding IPv4-mapped IPv6 back to IPv4.
fn canonical_peer(addr: SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => format!("{}:{}", v4, addr.port()),
            None => addr.to_string(),
        },
        IpAddr::V4(_) => addr.to_string(),
    }
}

/// Errors that abort server startup.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind port {port}: {error}")]
    Bind { port: u16, error: String },

    #[error(transparent)]
    Tls(#[from] TlsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_ipv6_peer_folds_to_ipv4() {
        let addr: SocketAddr = "[::ffff:192.0.2.7]:4600".parse().unwrap();
        assert_eq!(canonical_peer(addr), "192.0.2.7:4600");
    }

    #[test]
    fn native_addresses_format_unchanged() {
        let v4: SocketAddr = "10.0.0.1:4600".parse().unwrap();
        assert_eq!(canonical_peer(v4), "10.0.0.1:4600");

        let v6: SocketAddr = "[2001:db8::1]:4600".parse().unwrap();
        assert_eq!(canonical_peer(v6), "[2001:db8::1]:4600");
    }

    #[test]
    fn bind_error_names_the_port() {
        let err = ServerError::Bind {
            port: 4600,
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("4600"));
        assert!(err.to_string().contains("address in use"));
    }
}
