//! Collaborator traits

mod platform;
mod transport;

pub use platform::PlatformProbe;
pub use transport::{ConnectTarget, Transport};
