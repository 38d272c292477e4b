//! Platform detection

use crate::error::BeaconError;

/// Reports what the agent is running on.
///
/// The descriptor is logged once at startup; nothing branches on its content.
pub trait PlatformProbe: Send + Sync {
    /// Describe the host, or fail with [`BeaconError::UnsupportedPlatform`]
    fn describe(&self) -> Result<String, BeaconError>;
}
