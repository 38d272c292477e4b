//! Protocol error types

use thiserror::Error;

/// Reasons a datagram is not a valid server announcement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is not valid UTF-8
    #[error("Announcement is not valid UTF-8")]
    NotUtf8,

    /// Payload does not start with the announcement tag
    #[error("Missing announcement tag")]
    MissingTag,

    /// Tag present but the address field is empty
    #[error("Announcement carries no server address")]
    EmptyAddress,

    /// Address contains characters that cannot appear in a host name or IPv4 address
    #[error("Invalid server address: {0:?}")]
    InvalidAddress(String),

    /// Payload exceeds the datagram size
    #[error("Announcement too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
}
