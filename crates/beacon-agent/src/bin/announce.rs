//! beacon Announcer
//!
//! Runs next to the SSH server and broadcasts `SSH_SERVER:<address>` so
//! agents on the LAN can find it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacon_agent::Announcer;
use beacon_protocol::{ServerAnnouncement, DEFAULT_DISCOVERY_PORT};

#[derive(Parser)]
#[command(name = "beacon-announce")]
#[command(about = "Broadcast this server's address to beacon agents on the LAN")]
#[command(version)]
struct Args {
    /// Address to announce (defaults to this machine's hostname)
    #[arg(short, long)]
    address: Option<String>,

    /// UDP port agents listen on
    #[arg(short, long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    port: u16,

    /// Destination address (defaults to 255.255.255.255:<port>)
    #[arg(long)]
    target: Option<SocketAddr>,

    /// Seconds between announcements
    #[arg(short, long, default_value_t = 2)]
    interval: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let address = args
        .address
        .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());
    let announcement = ServerAnnouncement::new(address.clone())
        .with_context(|| format!("Cannot announce '{}'", address))?;

    let mut announcer = Announcer::new(announcement, args.port)
        .with_interval(Duration::from_secs(args.interval.max(1)));
    if let Some(target) = args.target {
        announcer = announcer.with_target(target);
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    announcer
        .run(cancel)
        .await
        .context("Announcer failed")?;
    Ok(())
}
