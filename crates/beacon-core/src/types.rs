//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ConfigError, ConnectError};

/// Credentials used to authenticate against the server
///
/// Exactly one authentication method is carried. The core never persists them.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password
    Password { username: String, password: String },
    /// Username and path to a private key file
    Key {
        username: String,
        private_key_path: PathBuf,
    },
}

impl Credentials {
    /// Password credentials
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Private key credentials
    pub fn key(username: impl Into<String>, private_key_path: impl Into<PathBuf>) -> Self {
        Self::Key {
            username: username.into(),
            private_key_path: private_key_path.into(),
        }
    }

    /// Build credentials from optional parts, as they arrive from configuration.
    ///
    /// Fails with [`ConnectError::InvalidCredentials`] unless exactly one of
    /// `password` and `private_key_path` is given.
    pub fn from_parts(
        username: &str,
        password: Option<&str>,
        private_key_path: Option<&Path>,
    ) -> Result<Self, ConnectError> {
        let credentials = match (password, private_key_path) {
            (Some(password), None) => Self::password(username, password),
            (None, Some(path)) => Self::key(username, path),
            (None, None) => {
                return Err(ConnectError::InvalidCredentials(
                    "either a password or a private key path must be provided".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ConnectError::InvalidCredentials(
                    "a password and a private key path were both provided".to_string(),
                ))
            }
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Username to authenticate as
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::Key { username, .. } => username,
        }
    }

    /// Short name of the authentication method, for logging
    pub fn method(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::Key { .. } => "publickey",
        }
    }

    /// Reject credentials that cannot possibly authenticate
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.username().is_empty() {
            return Err(ConnectError::InvalidCredentials(
                "username is empty".to_string(),
            ));
        }
        match self {
            Self::Password { password, .. } if password.is_empty() => Err(
                ConnectError::InvalidCredentials("password is empty".to_string()),
            ),
            Self::Key {
                private_key_path, ..
            } if private_key_path.as_os_str().is_empty() => Err(
                ConnectError::InvalidCredentials("private key path is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Key {
                username,
                private_key_path,
            } => f
                .debug_struct("Key")
                .field("username", username)
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

/// A reverse port forward: the server binds `remote_bind_port` and forwards
/// accepted connections back to `local_forward_host:local_forward_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Port bound on the server side
    pub remote_bind_port: u16,
    /// Host the client connects accepted connections to
    #[serde(default = "default_forward_host")]
    pub local_forward_host: String,
    /// Port the client connects accepted connections to
    pub local_forward_port: u16,
}

fn default_forward_host() -> String {
    "127.0.0.1".to_string()
}

impl TunnelSpec {
    /// Create a tunnel spec
    pub fn new(
        remote_bind_port: u16,
        local_forward_host: impl Into<String>,
        local_forward_port: u16,
    ) -> Self {
        Self {
            remote_bind_port,
            local_forward_host: local_forward_host.into(),
            local_forward_port,
        }
    }

    /// Forward remote `port` to the same port on the client's loopback
    pub fn mirrored(port: u16) -> Self {
        Self::new(port, default_forward_host(), port)
    }
}

impl fmt::Display for TunnelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "remote:{} -> {}:{}",
            self.remote_bind_port, self.local_forward_host, self.local_forward_port
        )
    }
}

/// How the server's host key is checked during the handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept and record any key the first time a host is seen.
    ///
    /// This is weak: an attacker on the LAN answering first is trusted.
    #[default]
    TrustOnFirstUse,
    /// Accept only keys already present in the known-hosts file
    TrustStoreVerified,
    /// Accept only the pinned fingerprint from configuration
    RejectUnknown,
}

impl HostKeyPolicy {
    /// Whether this policy can trust a key nobody vouched for
    pub fn is_weak(&self) -> bool {
        matches!(self, Self::TrustOnFirstUse)
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::TrustOnFirstUse => write!(f, "trust-on-first-use"),
            HostKeyPolicy::TrustStoreVerified => write!(f, "trust-store-verified"),
            HostKeyPolicy::RejectUnknown => write!(f, "reject-unknown"),
        }
    }
}

impl FromStr for HostKeyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trust-on-first-use" | "tofu" => Ok(Self::TrustOnFirstUse),
            "trust-store-verified" | "known-hosts" => Ok(Self::TrustStoreVerified),
            "reject-unknown" | "pinned" => Ok(Self::RejectUnknown),
            other => Err(ConfigError::Invalid(format!(
                "unknown host key policy '{}'",
                other
            ))),
        }
    }
}

/// What to do when the server refuses the reverse tunnel port at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelConflictPolicy {
    /// Close the session and exit
    #[default]
    Abort,
    /// Keep the session without a tunnel
    Proceed,
}

/// Lifecycle state of a supervised session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// Nothing requested yet
    Idle,
    /// Initial connection in progress
    Connecting,
    /// Authenticated and passing liveness probes
    Active,
    /// Session lost, reconnecting
    Degraded,
    /// Terminal state
    Closed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Connecting => write!(f, "connecting"),
            SupervisorState::Active => write!(f, "active"),
            SupervisorState::Degraded => write!(f, "degraded"),
            SupervisorState::Closed => write!(f, "closed"),
        }
    }
}
