//! Server-side announcement broadcaster

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use beacon_core::error::DiscoveryError;
use beacon_protocol::ServerAnnouncement;

/// Time between two broadcasts
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Periodically broadcasts a server announcement
#[derive(Debug, Clone)]
pub struct Announcer {
    announcement: ServerAnnouncement,
    target: SocketAddr,
    interval: Duration,
}

impl Announcer {
    /// Broadcast `announcement` to the limited broadcast address on `port`
    pub fn new(announcement: ServerAnnouncement, port: u16) -> Self {
        Self {
            announcement,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            interval: DEFAULT_ANNOUNCE_INTERVAL,
        }
    }

    /// Send to a specific address instead (subnet broadcast or unicast)
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// Change the broadcast interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Destination of the announcements
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Broadcast until cancelled. Returns the number of datagrams sent.
    ///
    /// Send failures are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> Result<u64, DiscoveryError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                addr: bind_addr,
                source,
            })?;
        socket
            .set_broadcast(true)
            .map_err(|source| DiscoveryError::BindFailed {
                addr: bind_addr,
                source,
            })?;

        let payload = self.announcement.encode();
        let mut sent = 0u64;

        tracing::info!(
            "Announcing {} to {} every {:?}",
            self.announcement.server_address(),
            self.target,
            self.interval
        );

        loop {
            match socket.send_to(&payload, self.target).await {
                Ok(_) => {
                    sent += 1;
                    tracing::trace!("Announcement #{} sent", sent);
                }
                Err(e) => tracing::warn!("Failed to send announcement to {}: {}", self.target, e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Announcer stopped after {} datagram(s)", sent);
        Ok(sent)
    }
}
