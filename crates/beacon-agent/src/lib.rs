//! beacon-agent: LAN discovery and supervised reverse-tunnel SSH sessions
//!
//! The agent listens for a server announcement on the local network,
//! authenticates over SSH, optionally asks the server to forward a port back
//! to this machine, and keeps that session alive until told to stop.

pub mod discovery;
pub mod platform;
pub mod session;
pub mod ssh;
pub mod supervisor;

pub use discovery::{Announcer, DiscoveryListener};
pub use platform::HostPlatform;
pub use session::{SessionConnector, TunnelRequester};
pub use ssh::SshTransport;
pub use supervisor::{
    SessionRequest, SessionSupervisor, SupervisorEvent, SupervisorSettings,
};
