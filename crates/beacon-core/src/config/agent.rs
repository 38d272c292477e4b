//! Agent configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use beacon_protocol::DEFAULT_DISCOVERY_PORT;

use super::backoff::BackoffConfig;
use super::serde_utils::duration_secs;
use crate::error::{ConfigError, ConnectError};
use crate::types::{Credentials, HostKeyPolicy, TunnelConflictPolicy, TunnelSpec};

/// Configuration for the client agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Server to connect to. When unset the agent discovers one on the LAN.
    pub server_address: Option<String>,

    /// SSH port on the server
    pub ssh_port: u16,

    /// How the server's host key is checked
    pub host_key_policy: HostKeyPolicy,

    /// Known-hosts file used by the trust-on-first-use and trust-store policies
    pub known_hosts_path: PathBuf,

    /// Pinned host key fingerprint, required by `reject-unknown`
    pub host_key_fingerprint: Option<String>,

    /// What to do when the tunnel port is already bound at startup
    pub tunnel_conflict: TunnelConflictPolicy,

    /// Timeout for the TCP connect plus SSH handshake
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// UDP discovery settings
    pub discovery: DiscoveryConfig,

    /// Authentication settings
    pub auth: AuthConfig,

    /// Optional reverse tunnel
    pub tunnel: Option<TunnelSpec>,

    /// Liveness probing
    pub keepalive: KeepaliveConfig,

    /// Reconnect backoff
    pub reconnect: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            ssh_port: 22,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: super::default_config_dir().join("known_hosts"),
            host_key_fingerprint: None,
            tunnel_conflict: TunnelConflictPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            discovery: DiscoveryConfig::default(),
            auth: AuthConfig::default(),
            tunnel: None,
            keepalive: KeepaliveConfig::default(),
            reconnect: BackoffConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh_port == 0 {
            return Err(ConfigError::Invalid("ssh_port must not be 0".into()));
        }
        if self.discovery.port == 0 {
            return Err(ConfigError::Invalid("discovery.port must not be 0".into()));
        }
        if self.discovery.attempts == 0 {
            return Err(ConfigError::Invalid(
                "discovery.attempts must be at least 1".into(),
            ));
        }
        if let Some(tunnel) = &self.tunnel {
            if tunnel.remote_bind_port == 0 || tunnel.local_forward_port == 0 {
                return Err(ConfigError::Invalid("tunnel ports must not be 0".into()));
            }
            if tunnel.local_forward_host.is_empty() {
                return Err(ConfigError::Invalid(
                    "tunnel.local_forward_host must not be empty".into(),
                ));
            }
        }
        if self.host_key_policy == HostKeyPolicy::RejectUnknown
            && self.host_key_fingerprint.is_none()
        {
            return Err(ConfigError::Invalid(
                "host_key_policy 'reject-unknown' requires host_key_fingerprint".into(),
            ));
        }
        if self.keepalive.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive.interval must be at least 1 second".into(),
            ));
        }
        if self.keepalive.probe_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive.probe_timeout must be at least 1 second".into(),
            ));
        }
        // NaN fails both comparisons, so test for the accepted range
        if !(self.reconnect.multiplier.is_finite() && self.reconnect.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "reconnect.multiplier must be a finite number >= 1.0".into(),
            ));
        }
        if self.reconnect.max < self.reconnect.initial {
            return Err(ConfigError::Invalid(
                "reconnect.max must not be smaller than reconnect.initial".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Invalid(
                "reconnect.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// UDP discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Port announcements are broadcast to
    pub port: u16,

    /// How long a single discovery attempt waits
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Discovery attempts before giving up
    pub attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            timeout: Duration::from_secs(10),
            attempts: 1,
        }
    }
}

/// Authentication settings as written in the config file.
///
/// Exactly one of `password` and `private_key_path` must be set.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Username for SSH authentication
    pub username: String,

    /// Password for password authentication
    pub password: Option<String>,

    /// Private key for public key authentication
    pub private_key_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: whoami::username(),
            password: None,
            private_key_path: None,
        }
    }
}

impl AuthConfig {
    /// Resolve the configured parts into credentials
    pub fn credentials(&self) -> Result<Credentials, ConnectError> {
        Credentials::from_parts(
            &self.username,
            self.password.as_deref(),
            self.private_key_path.as_deref(),
        )
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

/// Liveness probing of the established session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Interval between probes
    #[serde(with = "duration_secs")]
    pub interval: Duration,

    /// How long a single probe may take before the session counts as dead
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
        }
    }
}
