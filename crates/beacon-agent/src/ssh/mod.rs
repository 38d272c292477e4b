//! SSH transport built on russh
//!
//! Implements [`Transport`] for real servers: connect, authenticate, request
//! remote port forwards, and pump forwarded connections to the local target.

mod host_keys;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use beacon_core::config::AgentConfig;
use beacon_core::error::TransportError;
use beacon_core::traits::{ConnectTarget, Transport};
use beacon_core::HostKeyPolicy;

use host_keys::{decide, fingerprint_matches, KnownHost, Verdict};

/// Unanswered keep-alives before russh drops the connection
const KEEPALIVE_MAX: usize = 3;

/// Remote bind port → local `(host, port)` the connection is forwarded to
type ForwardMap = Arc<Mutex<HashMap<u32, (String, u16)>>>;

/// Transport talking to real SSH servers
#[derive(Debug, Clone)]
pub struct SshTransport {
    /// Timeout for TCP connect plus handshake
    connect_timeout: Duration,
    /// Interval of SSH-level keep-alive requests
    keepalive_interval: Duration,
    /// Known-hosts file for the trust-on-first-use and trust-store policies
    known_hosts_path: PathBuf,
    /// Pinned host key fingerprint
    host_key_fingerprint: Option<String>,
}

impl SshTransport {
    /// Create a transport from the agent configuration
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            keepalive_interval: config.keepalive.interval,
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_fingerprint: config.host_key_fingerprint.clone(),
        }
    }

    /// Open the connection; the handshake runs the host key policy
    async fn open(&self, target: &ConnectTarget) -> Result<SshSession, TransportError> {
        let ssh_config = Arc::new(Config {
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: KEEPALIVE_MAX,
            ..Config::default()
        });

        let rejection = Arc::new(Mutex::new(None));
        let forwards: ForwardMap = Arc::new(Mutex::new(HashMap::new()));
        let handler = ClientHandler {
            host: target.host.clone(),
            port: target.port,
            policy: target.host_key_policy,
            known_hosts_path: self.known_hosts_path.clone(),
            pinned: self.host_key_fingerprint.clone(),
            rejection: Arc::clone(&rejection),
            forwards: Arc::clone(&forwards),
        };

        tracing::debug!("Opening SSH connection to {}", target);
        let connected = tokio::time::timeout(
            self.connect_timeout,
            client::connect(ssh_config, (target.host.as_str(), target.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout)?;

        match connected {
            Ok(handle) => Ok(SshSession { handle, forwards }),
            Err(e) => {
                if let Some(message) = rejection.lock().await.take() {
                    return Err(TransportError::HostKeyRejected { message });
                }
                Err(TransportError::Other(
                    e.context(format!("Failed to connect to {}", target)),
                ))
            }
        }
    }
}

/// Authenticated russh session plus its forward table
pub struct SshSession {
    handle: Handle<ClientHandler>,
    forwards: ForwardMap,
}

#[async_trait]
impl Transport for SshTransport {
    type Session = SshSession;

    async fn authenticate_with_password(
        &self,
        target: &ConnectTarget,
        username: &str,
        password: &str,
    ) -> Result<SshSession, TransportError> {
        let mut session = self.open(target).await?;

        tracing::debug!("Authenticating as user '{}' with password", username);
        let authenticated = session
            .handle
            .authenticate_password(username, password)
            .await
            .map_err(|e| TransportError::Other(anyhow::anyhow!("Authentication error: {}", e)))?;

        if !authenticated {
            return Err(TransportError::AuthRejected);
        }
        Ok(session)
    }

    async fn authenticate_with_key(
        &self,
        target: &ConnectTarget,
        username: &str,
        key_path: &Path,
    ) -> Result<SshSession, TransportError> {
        // Load before dialing so a bad key costs no network round trip
        let key = load_key(key_path)?;
        let mut session = self.open(target).await?;

        tracing::debug!("Authenticating as user '{}' with public key", username);
        let authenticated = session
            .handle
            .authenticate_publickey(username, key)
            .await
            .map_err(|e| TransportError::Other(anyhow::anyhow!("Authentication error: {}", e)))?;

        if !authenticated {
            return Err(TransportError::AuthRejected);
        }
        Ok(session)
    }

    async fn request_remote_port_forward(
        &self,
        session: &mut SshSession,
        bind_port: u16,
        forward_host: &str,
        forward_port: u16,
    ) -> Result<(), TransportError> {
        // Register first so connections arriving right after the reply are routed
        session
            .forwards
            .lock()
            .await
            .insert(u32::from(bind_port), (forward_host.to_string(), forward_port));

        match session.handle.tcpip_forward("", u32::from(bind_port)).await {
            Ok(reply) => {
                tracing::debug!("tcpip-forward for port {} granted ({:?})", bind_port, reply);
                Ok(())
            }
            Err(e) => {
                session.forwards.lock().await.remove(&u32::from(bind_port));
                let message = e.to_string();
                if message.to_ascii_lowercase().contains("denied") {
                    Err(TransportError::PortInUse { port: bind_port })
                } else if session.handle.is_closed() {
                    Err(TransportError::ConnectionReset(message))
                } else {
                    Err(TransportError::Other(anyhow::anyhow!(
                        "tcpip-forward for port {} failed: {}",
                        bind_port,
                        message
                    )))
                }
            }
        }
    }

    async fn probe(&self, session: &mut SshSession) -> Result<(), TransportError> {
        if session.handle.is_closed() {
            return Err(TransportError::ConnectionReset(
                "SSH connection closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn close_session(&self, session: SshSession) -> Result<(), TransportError> {
        session.forwards.lock().await.clear();
        if session.handle.is_closed() {
            return Ok(());
        }
        session
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
            .map_err(|e| TransportError::Other(anyhow::anyhow!("Disconnect failed: {}", e)))
    }
}

fn load_key(path: &Path) -> Result<Arc<KeyPair>, TransportError> {
    if !path.exists() {
        return Err(TransportError::KeyUnreadable {
            path: path.to_path_buf(),
            message: "file does not exist".to_string(),
        });
    }

    russh_keys::load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| TransportError::KeyUnreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// russh callbacks for one connection
struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: PathBuf,
    pinned: Option<String>,
    /// Set when the host key policy refuses the server
    rejection: Arc<Mutex<Option<String>>>,
    forwards: ForwardMap,
}

impl ClientHandler {
    fn known_host(&self, key: &PublicKey) -> KnownHost {
        match russh_keys::check_known_hosts_path(&self.host, self.port, key, &self.known_hosts_path)
        {
            Ok(true) => KnownHost::Match,
            Ok(false) => KnownHost::Unknown,
            Err(russh_keys::Error::KeyChanged { .. }) => KnownHost::Changed,
            Err(e) => {
                tracing::warn!(
                    "Cannot read known-hosts file {:?}: {}",
                    self.known_hosts_path,
                    e
                );
                KnownHost::Unknown
            }
        }
    }

    fn record(&self, key: &PublicKey) {
        if let Some(parent) = self.known_hosts_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Cannot create {:?}: {}", parent, e);
                return;
            }
        }
        match russh_keys::learn_known_hosts_path(&self.host, self.port, key, &self.known_hosts_path)
        {
            Ok(()) => tracing::info!(
                "Recorded host key for {}:{} in {:?}",
                self.host,
                self.port,
                self.known_hosts_path
            ),
            Err(e) => tracing::warn!("Failed to record host key: {}", e),
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: SHA256:{}", fingerprint);

        let pinned = self
            .pinned
            .as_deref()
            .map(|pin| fingerprint_matches(pin, &fingerprint));
        let known = self.known_host(server_public_key);

        match decide(self.policy, known, pinned) {
            Verdict::Accept => Ok(true),
            Verdict::AcceptAndRecord => {
                tracing::warn!(
                    "Trusting previously unseen host key SHA256:{} for {}:{}",
                    fingerprint,
                    self.host,
                    self.port
                );
                self.record(server_public_key);
                Ok(true)
            }
            Verdict::AcceptChanged => {
                tracing::warn!(
                    "Host key for {}:{} differs from the recorded one (now SHA256:{}); accepting under trust-on-first-use",
                    self.host,
                    self.port,
                    fingerprint
                );
                Ok(true)
            }
            Verdict::Reject(reason) => {
                tracing::error!("Rejecting host key SHA256:{}: {}", fingerprint, reason);
                *self.rejection.lock().await = Some(reason);
                Ok(false)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let target = self.forwards.lock().await.get(&connected_port).cloned();
        let Some((host, port)) = target else {
            tracing::warn!(
                "Forwarded connection for unrequested port {}:{}, dropping",
                connected_address,
                connected_port
            );
            return Ok(());
        };

        tracing::debug!(
            "Forwarded connection from {}:{} -> {}:{}",
            originator_address,
            originator_port,
            host,
            port
        );

        tokio::spawn(async move {
            if let Err(e) = pump(channel, &host, port).await {
                tracing::warn!("Forwarded connection to {}:{} failed: {}", host, port, e);
            }
        });
        Ok(())
    }
}

/// Copy bytes between a forwarded channel and the local target until either side closes
async fn pump(channel: Channel<Msg>, host: &str, port: u16) -> std::io::Result<()> {
    let mut local = TcpStream::connect((host, port)).await?;
    let mut remote = channel.into_stream();
    let (up, down) = tokio::io::copy_bidirectional(&mut remote, &mut local).await?;
    tracing::trace!("Forwarded connection closed ({} bytes up, {} bytes down)", up, down);
    Ok(())
}
