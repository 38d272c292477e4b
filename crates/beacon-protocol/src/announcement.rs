//! Server announcement datagrams
//!
//! Wire format: `SSH_SERVER:<address>[:<ignored>...]`
//!
//! The address is the `:`-delimited field directly after the tag. Any further
//! fields are ignored so newer servers can append data without breaking older
//! clients. Trailing whitespace and NUL padding are stripped.

use std::fmt;

use crate::error::ProtocolError;

/// Literal prefix every announcement starts with
pub const ANNOUNCE_TAG: &str = "SSH_SERVER:";

/// Well-known UDP port shared by announcing servers and discovering clients
pub const DEFAULT_DISCOVERY_PORT: u16 = 50000;

/// Receive buffer size for a single announcement datagram
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// A server address advertised on the local network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAnnouncement {
    server_address: String,
}

impl ServerAnnouncement {
    /// Create an announcement for the given address
    pub fn new(server_address: impl Into<String>) -> Result<Self, ProtocolError> {
        let server_address = server_address.into();
        validate_address(&server_address)?;
        Ok(Self { server_address })
    }

    /// The advertised IPv4 address or host name
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Consume the announcement, returning the address
    pub fn into_address(self) -> String {
        self.server_address
    }

    /// Parse a raw datagram payload
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::TooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::NotUtf8)?;
        let text = text.trim_end_matches(|c: char| c == '\0' || c.is_ascii_whitespace());

        let rest = text
            .strip_prefix(ANNOUNCE_TAG)
            .ok_or(ProtocolError::MissingTag)?;

        let address = rest.split(':').next().unwrap_or_default().trim();
        if address.is_empty() {
            return Err(ProtocolError::EmptyAddress);
        }

        Self::new(address)
    }

    /// Encode the announcement as it is sent on the wire
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for ServerAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ANNOUNCE_TAG, self.server_address)
    }
}

fn validate_address(address: &str) -> Result<(), ProtocolError> {
    if address.is_empty() {
        return Err(ProtocolError::EmptyAddress);
    }

    let valid = address
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !valid || address.len() > 253 {
        return Err(ProtocolError::InvalidAddress(address.to_string()));
    }

    Ok(())
}
