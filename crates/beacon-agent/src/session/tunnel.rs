//! Reverse tunnel requests

use std::sync::Arc;

use beacon_core::error::{TransportError, TunnelError};
use beacon_core::traits::Transport;
use beacon_core::TunnelSpec;

/// Asks the server to bind a port that forwards back to this machine.
///
/// Only accepts a session produced by [`super::SessionConnector`], so a tunnel
/// can never be requested before authentication. Requests are not
/// deduplicated: asking twice for the same port normally fails with
/// [`TunnelError::PortInUse`].
pub struct TunnelRequester<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for TunnelRequester<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> TunnelRequester<T> {
    /// Create a requester driving `transport`
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Request the forward described by `spec`
    pub async fn request_reverse_tunnel(
        &self,
        session: &mut T::Session,
        spec: &TunnelSpec,
    ) -> Result<(), TunnelError> {
        let port = spec.remote_bind_port;
        tracing::debug!("Requesting reverse tunnel {}", spec);

        match self
            .transport
            .request_remote_port_forward(
                session,
                port,
                &spec.local_forward_host,
                spec.local_forward_port,
            )
            .await
        {
            Ok(()) => {
                tracing::info!("Reverse tunnel established: {}", spec);
                Ok(())
            }
            Err(TransportError::PortInUse { port }) => Err(TunnelError::PortInUse { port }),
            Err(source) => Err(TunnelError::Failed { port, source }),
        }
    }
}
