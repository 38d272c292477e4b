//! UDP announcement listener
//!
//! The socket lives only as long as one discovery attempt: it is bound when
//! the attempt starts and dropped on every return path, so repeated attempts
//! never trip over a lingering binding.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use beacon_core::error::DiscoveryError;
use beacon_protocol::{ServerAnnouncement, MAX_DATAGRAM_SIZE};

/// Waits for a server announcement on the discovery port
#[derive(Debug, Clone)]
pub struct DiscoveryListener {
    bind_addr: SocketAddr,
}

impl DiscoveryListener {
    /// Listen on `port` on all interfaces
    pub fn new(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        }
    }

    /// Listen on a specific address
    pub fn with_bind_addr(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    /// Address the socket will be bound to
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Bind the discovery socket
    pub async fn bind(&self) -> Result<BoundListener, DiscoveryError> {
        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                addr: self.bind_addr,
                source,
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| DiscoveryError::BindFailed {
                addr: self.bind_addr,
                source,
            })?;

        tracing::debug!("Discovery socket bound on UDP {}", local_addr);
        Ok(BoundListener { socket, local_addr })
    }

    /// Wait up to `timeout` for the first valid announcement.
    ///
    /// Returns `Ok(None)` when nothing valid arrived in time.
    pub async fn discover(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ServerAnnouncement>, DiscoveryError> {
        self.bind().await?.wait(timeout, cancel).await
    }
}

/// A bound discovery socket, released when dropped
#[derive(Debug)]
pub struct BoundListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl BoundListener {
    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first valid announcement, consuming the socket.
    ///
    /// Invalid datagrams are skipped without extending the deadline.
    pub async fn wait(
        self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ServerAnnouncement>, DiscoveryError> {
        let deadline = Instant::now() + timeout;
        // One extra byte so oversized payloads are detected instead of truncated
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        tracing::info!("Waiting up to {:?} for a server announcement", timeout);

        loop {
            if Instant::now() >= deadline {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)) => received,
            };

            let (len, src) = match received {
                Err(_elapsed) => break,
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) if is_transient_recv_error(&e) => {
                    tracing::debug!("Transient discovery receive error: {}", e);
                    continue;
                }
                Ok(Err(e)) => return Err(DiscoveryError::Recv(e)),
            };

            match ServerAnnouncement::parse(&buf[..len]) {
                Ok(announcement) => {
                    tracing::info!(
                        "Discovered server at {} (announced by {})",
                        announcement.server_address(),
                        src
                    );
                    return Ok(Some(announcement));
                }
                Err(e) => {
                    tracing::debug!("Ignoring datagram from {}: {}", src, e);
                }
            }
        }

        tracing::info!("Server discovery timed out");
        Ok(None)
    }
}

/// Errors that say nothing about the socket's health
fn is_transient_recv_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
    )
}
