//! Core error types for beacon

use beacon_protocol::ProtocolError;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit status for a clean shutdown
pub const EXIT_OK: u8 = 0;
/// Exit status for configuration and unexpected errors
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when the platform is not supported
pub const EXIT_UNSUPPORTED_PLATFORM: u8 = 2;
/// Exit status when no server could be discovered
pub const EXIT_DISCOVERY_FAILED: u8 = 3;
/// Exit status when the server could not be reached or refused authentication.
/// Unusable credentials are a configuration error and exit with [`EXIT_FAILURE`].
pub const EXIT_AUTH_FAILED: u8 = 4;
/// Exit status when the reverse tunnel could not be set up
pub const EXIT_TUNNEL_FAILED: u8 = 5;
/// Exit status when an established session was lost for good
pub const EXIT_CONNECTION_LOST: u8 = 6;

/// Stage of the agent lifecycle an error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Platform detection at startup
    Startup,
    /// UDP server discovery
    Discovery,
    /// Connection and authentication
    Connect,
    /// Reverse tunnel setup
    Tunnel,
    /// Liveness probing of an established session
    KeepAlive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Startup => write!(f, "startup"),
            Phase::Discovery => write!(f, "discovery"),
            Phase::Connect => write!(f, "connect"),
            Phase::Tunnel => write!(f, "tunnel"),
            Phase::KeepAlive => write!(f, "keep-alive"),
        }
    }
}

/// Top-level error type for the beacon agent
#[derive(Error, Debug)]
pub enum BeaconError {
    /// The host platform is not one the agent supports
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// No announcement was received
    #[error("No server announcement received after {attempts} attempt(s) of {timeout:?}")]
    DiscoveryTimeout { attempts: u32, timeout: Duration },

    /// Discovery socket failure
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Session setup or supervision failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BeaconError {
    /// Lifecycle phase the error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            BeaconError::UnsupportedPlatform(_) | BeaconError::Config(_) | BeaconError::Io(_) => {
                Phase::Startup
            }
            BeaconError::DiscoveryTimeout { .. } | BeaconError::Discovery(_) => Phase::Discovery,
            BeaconError::Session(e) => e.phase(),
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            BeaconError::UnsupportedPlatform(_) => EXIT_UNSUPPORTED_PLATFORM,
            BeaconError::DiscoveryTimeout { .. } | BeaconError::Discovery(_) => {
                EXIT_DISCOVERY_FAILED
            }
            BeaconError::Session(SessionError::Connect(ConnectError::InvalidCredentials(_))) => {
                EXIT_FAILURE
            }
            BeaconError::Session(SessionError::Connect(_)) => EXIT_AUTH_FAILED,
            BeaconError::Session(SessionError::Tunnel(_)) => EXIT_TUNNEL_FAILED,
            BeaconError::Session(SessionError::Lost(_))
            | BeaconError::Session(SessionError::ReconnectExhausted { .. }) => EXIT_CONNECTION_LOST,
            BeaconError::Config(_) | BeaconError::Io(_) => EXIT_FAILURE,
        }
    }
}

/// Failures reported by the SSH transport collaborator
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server refused the credentials
    #[error("Authentication rejected by server")]
    AuthRejected,

    /// The server's host key did not satisfy the host key policy
    #[error("Host key rejected: {message}")]
    HostKeyRejected { message: String },

    /// The private key file could not be loaded
    #[error("Failed to load private key {path}: {message}")]
    KeyUnreadable { path: PathBuf, message: String },

    /// The server refused to bind the requested remote port
    #[error("Remote port {port} is already bound")]
    PortInUse { port: u16 },

    /// An operation did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// The connection dropped or was never established
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other transport error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Whether waiting and trying again might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout
                | TransportError::ConnectionReset(_)
                | TransportError::Io(_)
                | TransportError::Other(_)
        )
    }
}

/// Connection and authentication errors
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Credentials are missing or malformed; detected before any network I/O
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The server was reached but refused authentication
    #[error("Authentication failed for {username}@{host}")]
    AuthenticationFailed { username: String, host: String },

    /// Host key policy refused the server
    #[error("Host key for {host} rejected: {message}")]
    HostKeyRejected { host: String, message: String },

    /// Network-level failure worth retrying
    #[error("Could not connect to {host}: {source}")]
    Transient {
        host: String,
        #[source]
        source: TransportError,
    },
}

impl ConnectError {
    /// Whether the supervisor may retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Transient { .. })
    }
}

/// Reverse tunnel errors
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The server already has something bound on the requested port
    #[error("Remote port {port} is already in use")]
    PortInUse { port: u16 },

    /// Any other failure while requesting the forward
    #[error("Reverse tunnel on port {port} failed: {source}")]
    Failed {
        port: u16,
        #[source]
        source: TransportError,
    },
}

impl TunnelError {
    /// Whether the failure is a port conflict
    pub fn is_port_in_use(&self) -> bool {
        matches!(self, TunnelError::PortInUse { .. })
    }

    /// Whether the failure came from a connection problem rather than a refusal
    pub fn is_transient(&self) -> bool {
        matches!(self, TunnelError::Failed { source, .. } if source.is_transient())
    }
}

/// Discovery listener errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound
    #[error("Failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Receiving a datagram failed
    #[error("Receive error: {0}")]
    Recv(#[source] std::io::Error),

    /// Discovery was cancelled before a server was found
    #[error("Discovery cancelled")]
    Cancelled,

    /// The announcement could not be encoded or parsed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors surfaced by the session supervisor, tagged by phase
#[derive(Error, Debug)]
pub enum SessionError {
    /// Connecting or authenticating failed
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Requesting the reverse tunnel failed
    #[error("tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),

    /// The established session stopped answering
    #[error("connection lost: {0}")]
    Lost(#[source] TransportError),

    /// The session died and could not be re-established
    #[error("connection lost, {attempts} reconnect attempt(s) failed: {last}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        last: Box<SessionError>,
    },
}

impl SessionError {
    /// Lifecycle phase the error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            SessionError::Connect(_) => Phase::Connect,
            SessionError::Tunnel(_) => Phase::Tunnel,
            SessionError::Lost(_) | SessionError::ReconnectExhausted { .. } => Phase::KeepAlive,
        }
    }

    /// Whether a reconnect cycle may fix this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Connect(e) => e.is_retryable(),
            SessionError::Tunnel(e) => e.is_transient(),
            SessionError::Lost(e) => e.is_transient(),
            SessionError::ReconnectExhausted { .. } => false,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
