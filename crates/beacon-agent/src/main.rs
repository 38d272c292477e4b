//! beacon Agent
//!
//! Finds the administration server on the LAN, opens an authenticated SSH
//! session with an optional reverse tunnel, and keeps it alive.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error (including missing or
//! conflicting credentials), 2 unsupported platform, 3 discovery failed,
//! 4 server unreachable or authentication failed, 5 tunnel failed,
//! 6 connection lost.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacon_agent::{
    DiscoveryListener, HostPlatform, SessionRequest, SessionSupervisor, SshTransport,
    SupervisorSettings,
};
use beacon_core::config::{self, AgentConfig};
use beacon_core::error::{ConfigError, DiscoveryError};
use beacon_core::traits::{ConnectTarget, PlatformProbe};
use beacon_core::{BeaconError, HostKeyPolicy, TunnelSpec};

#[derive(Parser)]
#[command(name = "beacon-agent")]
#[command(about = "beacon agent - discovers the server on the LAN and holds a reverse SSH tunnel")]
#[command(version)]
struct Args {
    /// Server to connect to; skips LAN discovery
    #[arg(short, long)]
    server: Option<String>,

    /// SSH port on the server
    #[arg(short, long)]
    port: Option<u16>,

    /// UDP port to listen on for announcements
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Seconds to wait for an announcement
    #[arg(long)]
    discovery_timeout: Option<u64>,

    /// Username for SSH authentication
    #[arg(short, long)]
    user: Option<String>,

    /// Password for SSH authentication
    #[arg(long, env = "BEACON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Private key for SSH authentication
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Remote port the server binds for the reverse tunnel
    #[arg(short, long)]
    tunnel_port: Option<u16>,

    /// Local host the tunnel forwards to
    #[arg(long, requires = "tunnel_port")]
    local_host: Option<String>,

    /// Local port the tunnel forwards to (defaults to the tunnel port)
    #[arg(long, requires = "tunnel_port")]
    local_port: Option<u16>,

    /// Host key policy: trust-on-first-use, trust-store-verified, reject-unknown
    #[arg(long)]
    host_key_policy: Option<HostKeyPolicy>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    match run(args, cancel).await {
        Ok(()) => {
            tracing::info!("beacon agent stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{} failed: {}", e.phase(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<(), BeaconError> {
    tracing::info!("beacon agent starting...");

    let platform = HostPlatform.describe()?;
    tracing::info!("Detected platform: {}", platform);

    let config = load_config(&args)?;
    config.validate()?;

    let credentials = config
        .auth
        .credentials()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    if config.host_key_policy.is_weak() {
        tracing::warn!(
            "Host key policy is {}: any host key is trusted the first time it is seen",
            config.host_key_policy
        );
    }

    let server = match config.server_address.clone() {
        Some(server) => server,
        None => match discover(&config, &cancel).await {
            Ok(server) => server,
            Err(BeaconError::Discovery(DiscoveryError::Cancelled)) => return Ok(()),
            Err(e) => return Err(e),
        },
    };

    let request = SessionRequest {
        target: ConnectTarget::new(server, config.ssh_port, config.host_key_policy),
        credentials,
        tunnel: config.tunnel.clone(),
    };
    if let Some(tunnel) = &request.tunnel {
        tracing::info!("Reverse tunnel requested: {}", tunnel);
    }

    let transport = Arc::new(SshTransport::from_config(&config));
    let supervisor = SessionSupervisor::new(transport, SupervisorSettings::from_config(&config));
    supervisor.run(request, cancel).await?;
    Ok(())
}

/// Load the config file and apply command-line overrides
fn load_config(args: &Args) -> Result<AgentConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => {
            let path = config::default_config_path();
            if path.exists() {
                config::load_config(&path)?
            } else {
                AgentConfig::default()
            }
        }
    };

    if let Some(server) = &args.server {
        config.server_address = Some(server.clone());
    }
    if let Some(port) = args.port {
        config.ssh_port = port;
    }
    if let Some(port) = args.discovery_port {
        config.discovery.port = port;
    }
    if let Some(secs) = args.discovery_timeout {
        config.discovery.timeout = Duration::from_secs(secs);
    }
    if let Some(user) = &args.user {
        config.auth.username = user.clone();
    }
    if let Some(password) = &args.password {
        config.auth.password = Some(password.clone());
    }
    if let Some(key) = &args.key {
        config.auth.private_key_path = Some(key.clone());
    }
    if let Some(policy) = args.host_key_policy {
        config.host_key_policy = policy;
    }
    if let Some(remote) = args.tunnel_port {
        let mut tunnel = TunnelSpec::mirrored(remote);
        if let Some(host) = &args.local_host {
            tunnel.local_forward_host = host.clone();
        }
        if let Some(port) = args.local_port {
            tunnel.local_forward_port = port;
        }
        config.tunnel = Some(tunnel);
    }

    Ok(config)
}

/// Run discovery until a server answers or the attempts are used up
async fn discover(config: &AgentConfig, cancel: &CancellationToken) -> Result<String, BeaconError> {
    tracing::info!(
        "Discovering server on UDP port {} (announcements are unauthenticated; the LAN is trusted)",
        config.discovery.port
    );

    let listener = DiscoveryListener::new(config.discovery.port);
    for attempt in 1..=config.discovery.attempts {
        match listener.discover(config.discovery.timeout, cancel).await? {
            Some(announcement) => return Ok(announcement.into_address()),
            None if attempt < config.discovery.attempts => {
                tracing::warn!(
                    "No server announcement (attempt {}/{}), listening again",
                    attempt,
                    config.discovery.attempts
                );
            }
            None => {}
        }
    }

    Err(BeaconError::DiscoveryTimeout {
        attempts: config.discovery.attempts,
        timeout: config.discovery.timeout,
    })
}
