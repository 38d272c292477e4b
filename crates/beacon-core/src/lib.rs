//! beacon-core: Core abstractions and configuration for beacon
//!
//! Shared types, error taxonomy, collaborator traits and configuration
//! structures used by the agent and the announcer.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{BeaconError, Phase};
pub use types::{Credentials, HostKeyPolicy, SupervisorState, TunnelSpec};
