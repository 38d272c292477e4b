//! Session supervision
//!
//! Drives one session through `Idle → Connecting → Active ⇄ Degraded → Closed`.
//! The supervisor owns the session once it exists and closes it exactly once,
//! whichever way the run ends.

mod backoff;

pub use backoff::ExponentialBackoff;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use beacon_core::config::{AgentConfig, BackoffConfig};
use beacon_core::error::{SessionError, TransportError, TunnelError};
use beacon_core::traits::{ConnectTarget, Transport};
use beacon_core::types::TunnelConflictPolicy;
use beacon_core::{Credentials, SupervisorState, TunnelSpec};

use crate::session::{SessionConnector, TunnelRequester};

/// Capacity of the supervisor event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timing and retry settings for a supervised session
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Time between liveness probes while active
    pub keepalive_interval: Duration,
    /// Upper bound for one probe, tunnel request or close
    pub probe_timeout: Duration,
    /// Reconnect backoff and attempt budget
    pub backoff: BackoffConfig,
    /// Reaction to a refused tunnel port
    pub tunnel_conflict: TunnelConflictPolicy,
}

impl SupervisorSettings {
    /// Settings taken from the agent configuration
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive.interval,
            probe_timeout: config.keepalive.probe_timeout,
            backoff: config.reconnect.clone(),
            tunnel_conflict: config.tunnel_conflict,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// Everything needed to (re-)establish the session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Server and host key policy
    pub target: ConnectTarget,
    /// Authentication
    pub credentials: Credentials,
    /// Optional reverse tunnel, re-requested after every reconnect
    pub tunnel: Option<TunnelSpec>,
}

/// Observable supervisor activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The supervisor entered `to`. Re-entering `Degraded` after a failed
    /// reconnect is reported as `Degraded → Degraded`.
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    /// A retry will run after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The server refused the tunnel port and the session continues without it
    TunnelUnavailable { port: u16 },
}

/// Why the keep-alive loop returned
enum Hold {
    Cancelled,
    Lost(TransportError),
}

/// Owns a session and keeps it alive
pub struct SessionSupervisor<T: Transport> {
    transport: Arc<T>,
    connector: SessionConnector<T>,
    tunnels: TunnelRequester<T>,
    settings: SupervisorSettings,
    state: SupervisorState,
    events: broadcast::Sender<SupervisorEvent>,
}

impl<T: Transport> SessionSupervisor<T> {
    /// Create an idle supervisor
    pub fn new(transport: Arc<T>, settings: SupervisorSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connector: SessionConnector::new(Arc::clone(&transport)),
            tunnels: TunnelRequester::new(Arc::clone(&transport)),
            transport,
            settings,
            state: SupervisorState::Idle,
            events,
        }
    }

    /// Current state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Subscribe to supervisor events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Establish the session and supervise it until `cancel` fires or it
    /// cannot be recovered.
    ///
    /// Returns `Ok(())` after a requested shutdown. Authentication failures
    /// are never retried; network failures are retried with backoff.
    pub async fn run(
        mut self,
        request: SessionRequest,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        self.transition(SupervisorState::Connecting);

        let mut session = match self.connect_initial(&request, &cancel).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::info!("Shutdown requested while connecting");
                self.transition(SupervisorState::Closed);
                return Ok(());
            }
            Err(e) => {
                self.transition(SupervisorState::Closed);
                return Err(e);
            }
        };

        self.transition(SupervisorState::Active);
        tracing::info!("Session established, keeping connection alive");

        loop {
            match self.hold(&mut session, &cancel).await {
                Hold::Cancelled => {
                    tracing::info!("Shutdown requested, closing session");
                    self.close(session).await;
                    self.transition(SupervisorState::Closed);
                    return Ok(());
                }
                Hold::Lost(cause) => {
                    tracing::warn!("Session lost: {}", cause);
                    self.close(session).await;
                    self.transition(SupervisorState::Degraded);

                    match self.reconnect(&request, cause, &cancel).await {
                        Ok(Some(restored)) => {
                            session = restored;
                            self.transition(SupervisorState::Active);
                            tracing::info!("Session restored");
                        }
                        Ok(None) => {
                            tracing::info!("Shutdown requested while reconnecting");
                            self.transition(SupervisorState::Closed);
                            return Ok(());
                        }
                        Err(e) => {
                            self.transition(SupervisorState::Closed);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// First connection. Network failures are retried within the backoff
    /// budget while staying in `Connecting`.
    async fn connect_initial(
        &self,
        request: &SessionRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<T::Session>, SessionError> {
        let mut backoff = ExponentialBackoff::from_config(&self.settings.backoff);
        let max_attempts = self.settings.backoff.max_attempts;

        loop {
            let err = match self.establish(request, cancel, true).await {
                Ok(session) => return Ok(session),
                Err(e) => e,
            };

            if !err.is_retryable() || backoff.attempts() >= max_attempts {
                return Err(err);
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempts();
            tracing::warn!(
                "Connection failed: {}. Retrying in {:?} ({}/{})",
                err,
                delay,
                attempt,
                max_attempts
            );
            self.emit(SupervisorEvent::ReconnectScheduled { attempt, delay });

            if !self.wait(delay, cancel).await {
                return Ok(None);
            }
        }
    }

    /// Reconnect cycles after the session was lost
    async fn reconnect(
        &mut self,
        request: &SessionRequest,
        cause: TransportError,
        cancel: &CancellationToken,
    ) -> Result<Option<T::Session>, SessionError> {
        let mut backoff = ExponentialBackoff::from_config(&self.settings.backoff);
        let max_attempts = self.settings.backoff.max_attempts;
        let mut last = SessionError::Lost(cause);

        while backoff.attempts() < max_attempts {
            let delay = backoff.next_delay();
            let attempt = backoff.attempts();
            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                attempt,
                max_attempts
            );
            self.emit(SupervisorEvent::ReconnectScheduled { attempt, delay });

            if !self.wait(delay, cancel).await {
                return Ok(None);
            }

            match self.establish(request, cancel, false).await {
                Ok(session) => return Ok(session),
                Err(e) if is_reconnectable(&e) => {
                    tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                    self.transition(SupervisorState::Degraded);
                    last = e;
                }
                Err(e) => {
                    tracing::error!("Reconnect aborted: {}", e);
                    return Err(e);
                }
            }
        }

        Err(SessionError::ReconnectExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    /// One connect + tunnel cycle. `Ok(None)` means cancelled; any session
    /// created on a failing path is closed before returning.
    async fn establish(
        &self,
        request: &SessionRequest,
        cancel: &CancellationToken,
        initial: bool,
    ) -> Result<Option<T::Session>, SessionError> {
        // No session exists until connect returns, so dropping it on cancel leaks nothing
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = self.connector.connect_with(&request.target, &request.credentials) => result?,
        };

        if let Some(spec) = &request.tunnel {
            let result = tokio::time::timeout(
                self.settings.probe_timeout,
                self.tunnels.request_reverse_tunnel(&mut session, spec),
            )
            .await
            .unwrap_or(Err(TunnelError::Failed {
                port: spec.remote_bind_port,
                source: TransportError::Timeout,
            }));

            match result {
                Ok(()) => {}
                Err(TunnelError::PortInUse { port })
                    if self.settings.tunnel_conflict == TunnelConflictPolicy::Proceed =>
                {
                    tracing::warn!(
                        "Remote port {} is already in use, continuing without reverse tunnel",
                        port
                    );
                    self.emit(SupervisorEvent::TunnelUnavailable { port });
                }
                Err(e) => {
                    if initial {
                        tracing::error!("Reverse tunnel setup failed: {}", e);
                    }
                    self.close(session).await;
                    return Err(e.into());
                }
            }
        }

        if cancel.is_cancelled() {
            self.close(session).await;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Keep-alive loop while `Active`
    async fn hold(&self, session: &mut T::Session, cancel: &CancellationToken) -> Hold {
        loop {
            if !self.wait(self.settings.keepalive_interval, cancel).await {
                return Hold::Cancelled;
            }

            let probe = tokio::time::timeout(
                self.settings.probe_timeout,
                self.transport.probe(session),
            );
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Hold::Cancelled,
                outcome = probe => outcome,
            };

            match outcome {
                Ok(Ok(())) => tracing::trace!("Keep-alive probe ok"),
                Ok(Err(e)) => return Hold::Lost(e),
                Err(_) => return Hold::Lost(TransportError::Timeout),
            }
        }
    }

    /// Sleep for `delay`. Returns `false` if cancelled first.
    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Release a session. Failures are logged, never propagated.
    async fn close(&self, session: T::Session) {
        match tokio::time::timeout(
            self.settings.probe_timeout,
            self.transport.close_session(session),
        )
        .await
        {
            Ok(Ok(())) => tracing::debug!("Session closed"),
            Ok(Err(e)) => tracing::warn!("Error while closing session: {}", e),
            Err(_) => tracing::warn!("Timed out closing session"),
        }
    }

    fn transition(&mut self, to: SupervisorState) {
        let from = self.state;
        self.state = to;
        tracing::debug!("Supervisor state {} -> {}", from, to);
        self.emit(SupervisorEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Reconnect-time failures worth another cycle. A refused tunnel port right
/// after a drop is usually our own stale binding, so it is retried too.
fn is_reconnectable(err: &SessionError) -> bool {
    err.is_retryable() || matches!(err, SessionError::Tunnel(t) if t.is_port_in_use())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::error::ConnectError;

    #[test]
    fn test_stale_port_binding_is_reconnectable() {
        let err = SessionError::Tunnel(TunnelError::PortInUse { port: 8080 });
        assert!(is_reconnectable(&err));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_failure_is_not_reconnectable() {
        let err = SessionError::Connect(ConnectError::AuthenticationFailed {
            username: "ops".into(),
            host: "h:22".into(),
        });
        assert!(!is_reconnectable(&err));
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = AgentConfig::default();
        config.keepalive.interval = Duration::from_secs(7);
        config.reconnect.max_attempts = 2;

        let settings = SupervisorSettings::from_config(&config);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(7));
        assert_eq!(settings.backoff.max_attempts, 2);
        assert_eq!(settings.tunnel_conflict, TunnelConflictPolicy::Abort);
    }
}
