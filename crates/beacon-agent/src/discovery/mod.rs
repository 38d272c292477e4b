//! LAN server discovery
//!
//! Servers broadcast `SSH_SERVER:<address>` datagrams on a well-known UDP
//! port. The listener takes the first valid one. Announcements are unsigned,
//! so discovery trusts every host on the local network.

mod announcer;
mod listener;

pub use announcer::{Announcer, DEFAULT_ANNOUNCE_INTERVAL};
pub use listener::{BoundListener, DiscoveryListener};
