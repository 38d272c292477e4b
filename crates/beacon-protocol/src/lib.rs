//! beacon-protocol: Wire format for beacon server discovery
//!
//! A server advertises itself on the local network by broadcasting a single
//! ASCII UDP datagram of the form `SSH_SERVER:<ipv4-or-hostname>`. There is no
//! length prefix, sequence number or signature: the first valid datagram a
//! client sees wins. Anyone on the LAN can send one, so discovery trusts the
//! local network.

pub mod announcement;
pub mod error;

pub use announcement::{ServerAnnouncement, ANNOUNCE_TAG, DEFAULT_DISCOVERY_PORT, MAX_DATAGRAM_SIZE};
pub use error::ProtocolError;
