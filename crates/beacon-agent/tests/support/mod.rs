//! Scripted in-memory transport for exercising the session layer

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use beacon_agent::SupervisorSettings;
use beacon_core::config::BackoffConfig;
use beacon_core::error::TransportError;
use beacon_core::traits::{ConnectTarget, Transport};
use beacon_core::types::TunnelConflictPolicy;

/// Session handed out by [`StubTransport`]
#[derive(Debug)]
pub struct StubSession {
    pub id: u32,
    pub ports: Vec<u16>,
}

/// Transport whose outcomes are queued up front.
///
/// Queued `None` means success; an empty queue also succeeds.
#[derive(Default)]
pub struct StubTransport {
    pub password_calls: AtomicUsize,
    pub key_calls: AtomicUsize,
    pub forward_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    next_id: AtomicU32,
    reject_auth: bool,
    /// Time every authentication takes before its outcome is known
    connect_delay: Option<Duration>,
    /// Time every forward request takes before the server answers
    forward_delay: Option<Duration>,
    connect_outcomes: Mutex<VecDeque<Option<TransportError>>>,
    probe_outcomes: Mutex<VecDeque<Option<TransportError>>>,
    /// Ports the "server" currently has bound
    bound_ports: Mutex<HashSet<u16>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every authentication attempt is refused by the server
    pub fn rejecting_auth() -> Self {
        Self {
            reject_auth: true,
            ..Self::default()
        }
    }

    pub fn script_connects(self, outcomes: Vec<Option<TransportError>>) -> Self {
        *self.connect_outcomes.lock().unwrap() = outcomes.into();
        self
    }

    pub fn script_probes(self, outcomes: Vec<Option<TransportError>>) -> Self {
        *self.probe_outcomes.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_forward_delay(mut self, delay: Duration) -> Self {
        self.forward_delay = Some(delay);
        self
    }

    /// Pretend another client already holds `port`
    pub fn occupy_port(self, port: u16) -> Self {
        self.bound_ports.lock().unwrap().insert(port);
        self
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.bound_ports.lock().unwrap().contains(&port)
    }

    pub fn auth_calls(&self) -> usize {
        self.password_calls.load(Ordering::SeqCst) + self.key_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn forwards(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<StubSession, TransportError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_auth {
            return Err(TransportError::AuthRejected);
        }
        if let Some(Some(err)) = self.connect_outcomes.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(StubSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            ports: Vec::new(),
        })
    }
}

#[async_trait]
impl Transport for StubTransport {
    type Session = StubSession;

    async fn authenticate_with_password(
        &self,
        _target: &ConnectTarget,
        _username: &str,
        _password: &str,
    ) -> Result<StubSession, TransportError> {
        self.password_calls.fetch_add(1, Ordering::SeqCst);
        self.open().await
    }

    async fn authenticate_with_key(
        &self,
        _target: &ConnectTarget,
        _username: &str,
        _key_path: &Path,
    ) -> Result<StubSession, TransportError> {
        self.key_calls.fetch_add(1, Ordering::SeqCst);
        self.open().await
    }

    async fn request_remote_port_forward(
        &self,
        session: &mut StubSession,
        bind_port: u16,
        _forward_host: &str,
        _forward_port: u16,
    ) -> Result<(), TransportError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.forward_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.bound_ports.lock().unwrap().insert(bind_port) {
            return Err(TransportError::PortInUse { port: bind_port });
        }
        session.ports.push(bind_port);
        Ok(())
    }

    async fn probe(&self, _session: &mut StubSession) -> Result<(), TransportError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        match self.probe_outcomes.lock().unwrap().pop_front() {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    async fn close_session(&self, session: StubSession) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut bound = self.bound_ports.lock().unwrap();
        for port in session.ports {
            bound.remove(&port);
        }
        Ok(())
    }
}

/// Deterministic settings: 5s keep-alive, 1s → 2s → 4s backoff, no jitter
pub fn settings(max_attempts: u32) -> SupervisorSettings {
    SupervisorSettings {
        keepalive_interval: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(10),
        backoff: BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts,
        },
        tunnel_conflict: TunnelConflictPolicy::Abort,
    }
}

pub fn reset() -> Option<TransportError> {
    Some(TransportError::ConnectionReset("peer went away".to_string()))
}
