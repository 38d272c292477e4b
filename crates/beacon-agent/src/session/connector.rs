//! Connect and authenticate against the server

use std::sync::Arc;

use beacon_core::config::AuthConfig;
use beacon_core::error::{ConnectError, TransportError};
use beacon_core::traits::{ConnectTarget, Transport};
use beacon_core::{Credentials, HostKeyPolicy};

/// Turns a server address plus credentials into an authenticated session.
///
/// Makes exactly one authentication attempt per call; retrying is the
/// supervisor's job.
pub struct SessionConnector<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for SessionConnector<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> SessionConnector<T> {
    /// Create a connector driving `transport`
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Connect using credentials as they come from configuration.
    ///
    /// Unless exactly one of password and key path is set this fails with
    /// [`ConnectError::InvalidCredentials`] without touching the network.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        auth: &AuthConfig,
        host_key_policy: HostKeyPolicy,
    ) -> Result<T::Session, ConnectError> {
        let credentials = auth.credentials()?;
        let target = ConnectTarget::new(address, port, host_key_policy);
        self.connect_with(&target, &credentials).await
    }

    /// Connect with already resolved credentials
    pub async fn connect_with(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<T::Session, ConnectError> {
        credentials.validate()?;

        tracing::info!(
            "Connecting to SSH server {} as '{}' ({})",
            target,
            credentials.username(),
            credentials.method()
        );

        let result = match credentials {
            Credentials::Password { username, password } => {
                self.transport
                    .authenticate_with_password(target, username, password)
                    .await
            }
            Credentials::Key {
                username,
                private_key_path,
            } => {
                self.transport
                    .authenticate_with_key(target, username, private_key_path)
                    .await
            }
        };

        match result {
            Ok(session) => {
                tracing::info!("Authenticated to {}", target);
                Ok(session)
            }
            Err(e) => Err(classify(target, credentials, e)),
        }
    }
}

/// Map a transport failure onto what the supervisor needs to decide
fn classify(target: &ConnectTarget, credentials: &Credentials, err: TransportError) -> ConnectError {
    match err {
        TransportError::AuthRejected => ConnectError::AuthenticationFailed {
            username: credentials.username().to_string(),
            host: target.to_string(),
        },
        TransportError::HostKeyRejected { message } => ConnectError::HostKeyRejected {
            host: target.to_string(),
            message,
        },
        TransportError::KeyUnreadable { path, message } => ConnectError::InvalidCredentials(
            format!("cannot use private key {}: {}", path.display(), message),
        ),
        source => ConnectError::Transient {
            host: target.to_string(),
            source,
        },
    }
}
