//! SSH transport collaborator
//!
//! The agent never speaks SSH itself. Everything it needs from the transport
//! library goes through [`Transport`], and every call may fail.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;

use crate::error::TransportError;
use crate::types::HostKeyPolicy;

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Server host name or address
    pub host: String,
    /// Server SSH port
    pub port: u16,
    /// Host key check applied during the handshake
    pub host_key_policy: HostKeyPolicy,
}

impl ConnectTarget {
    /// Create a target
    pub fn new(host: impl Into<String>, port: u16, host_key_policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            host_key_policy,
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Operations the core drives on the SSH library
#[async_trait]
pub trait Transport: Send + Sync {
    /// Live authenticated connection handle
    type Session: Send;

    /// Connect and authenticate with a password
    async fn authenticate_with_password(
        &self,
        target: &ConnectTarget,
        username: &str,
        password: &str,
    ) -> Result<Self::Session, TransportError>;

    /// Connect and authenticate with a private key file
    async fn authenticate_with_key(
        &self,
        target: &ConnectTarget,
        username: &str,
        key_path: &Path,
    ) -> Result<Self::Session, TransportError>;

    /// Ask the server to bind `bind_port` and forward connections to
    /// `forward_host:forward_port` on this side
    async fn request_remote_port_forward(
        &self,
        session: &mut Self::Session,
        bind_port: u16,
        forward_host: &str,
        forward_port: u16,
    ) -> Result<(), TransportError>;

    /// Cheap liveness check; an error means the session is gone
    async fn probe(&self, session: &mut Self::Session) -> Result<(), TransportError>;

    /// Tear the session down, releasing the socket and any remote binding
    async fn close_session(&self, session: Self::Session) -> Result<(), TransportError>;
}
