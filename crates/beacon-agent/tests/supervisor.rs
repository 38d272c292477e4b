//! Session supervisor integration tests
//!
//! Runs the supervisor against the scripted transport with paused time, so
//! keep-alive intervals and backoff delays elapse instantly.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use beacon_agent::{SessionRequest, SessionSupervisor, SupervisorEvent, SupervisorSettings};
use beacon_core::error::{ConnectError, SessionError, TransportError, TunnelError};
use beacon_core::traits::ConnectTarget;
use beacon_core::types::TunnelConflictPolicy;
use beacon_core::{BeaconError, Credentials, HostKeyPolicy, SupervisorState, TunnelSpec};

use support::{reset, settings, StubTransport};

fn request(tunnel: Option<TunnelSpec>) -> SessionRequest {
    SessionRequest {
        target: ConnectTarget::new("203.0.113.5", 22, HostKeyPolicy::TrustOnFirstUse),
        credentials: Credentials::password("ops", "secret"),
        tunnel,
    }
}

struct Running {
    transport: Arc<StubTransport>,
    events: broadcast::Receiver<SupervisorEvent>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<Result<(), SessionError>>,
}

fn start(
    transport: StubTransport,
    settings: SupervisorSettings,
    tunnel: Option<TunnelSpec>,
) -> Running {
    let transport = Arc::new(transport);
    let supervisor = SessionSupervisor::new(Arc::clone(&transport), settings);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    let events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(supervisor.run(request(tunnel), cancel.clone()));
    Running {
        transport,
        events,
        cancel,
        handle,
    }
}

/// Receive events until `stop` matches, returning everything seen
async fn events_until(
    events: &mut broadcast::Receiver<SupervisorEvent>,
    mut stop: impl FnMut(&SupervisorEvent) -> bool,
) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("supervisor event");
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn entered(to: SupervisorState) -> impl FnMut(&SupervisorEvent) -> bool {
    move |e| matches!(e, SupervisorEvent::StateChanged { to: t, .. } if *t == to)
}

fn transitions(events: &[SupervisorEvent]) -> Vec<(SupervisorState, SupervisorState)> {
    events
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn delays(events: &[SupervisorEvent]) -> Vec<Duration> {
    events
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::ReconnectScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_exponential_backoff() {
    use SupervisorState::*;

    let transport = StubTransport::new()
        .script_probes(vec![reset()])
        .script_connects(vec![None, reset(), reset(), None]);
    let mut run = start(transport, settings(5), None);
    let started = Instant::now();

    let mut seen = events_until(&mut run.events, entered(Active)).await;
    seen.extend(events_until(&mut run.events, entered(Active)).await);
    let elapsed = started.elapsed();

    assert_eq!(
        transitions(&seen),
        vec![
            (Idle, Connecting),
            (Connecting, Active),
            (Active, Degraded),
            (Degraded, Degraded),
            (Degraded, Degraded),
            (Degraded, Active),
        ]
    );
    assert_eq!(
        delays(&seen),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    // 5s keep-alive interval, then 1 + 2 + 4 seconds of backoff
    assert!(elapsed >= Duration::from_secs(12), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(13), "elapsed {:?}", elapsed);
    assert_eq!(run.transport.auth_calls(), 4);

    run.cancel.cancel();
    assert!(run.handle.await.unwrap().is_ok());
    // The lost session plus the restored one
    assert_eq!(run.transport.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_degraded_skips_pending_attempt() {
    let transport = StubTransport::new().script_probes(vec![reset()]);
    let mut run = start(transport, settings(5), None);

    events_until(&mut run.events, |e| {
        matches!(e, SupervisorEvent::ReconnectScheduled { attempt: 1, .. })
    })
    .await;
    let cancelled_at = Instant::now();
    run.cancel.cancel();

    assert!(run.handle.await.unwrap().is_ok());
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(run.transport.auth_calls(), 1);
    assert_eq!(run.transport.closes(), 1);

    let rest = events_until(&mut run.events, entered(SupervisorState::Closed)).await;
    assert_eq!(
        transitions(&rest),
        vec![(SupervisorState::Degraded, SupervisorState::Closed)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_active_closes_once() {
    let mut run = start(StubTransport::new(), settings(5), None);

    events_until(&mut run.events, entered(SupervisorState::Active)).await;
    tokio::time::sleep(Duration::from_secs(12)).await;
    run.cancel.cancel();

    assert!(run.handle.await.unwrap().is_ok());
    assert_eq!(run.transport.closes(), 1);
    assert!(run.transport.probe_calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_not_retried() {
    let mut run = start(StubTransport::rejecting_auth(), settings(5), None);

    let err = run.handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::AuthenticationFailed { .. })
    ));
    assert_eq!(run.transport.auth_calls(), 1);
    assert_eq!(run.transport.closes(), 0);
    assert_eq!(BeaconError::from(err).exit_code(), 4);

    let seen = events_until(&mut run.events, entered(SupervisorState::Closed)).await;
    assert_eq!(
        transitions(&seen),
        vec![
            (SupervisorState::Idle, SupervisorState::Connecting),
            (SupervisorState::Connecting, SupervisorState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_initial_network_failure_is_retried() {
    let transport = StubTransport::new().script_connects(vec![reset(), None]);
    let mut run = start(transport, settings(5), None);

    let seen = events_until(&mut run.events, entered(SupervisorState::Active)).await;
    assert_eq!(delays(&seen), vec![Duration::from_secs(1)]);
    assert_eq!(run.transport.auth_calls(), 2);

    run.cancel.cancel();
    assert!(run.handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_port_conflict_aborts_and_closes_session() {
    let transport = StubTransport::new().occupy_port(8080);
    let run = start(transport, settings(5), Some(TunnelSpec::mirrored(8080)));

    let err = run.handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Tunnel(TunnelError::PortInUse { port: 8080 })
    ));
    assert_eq!(run.transport.auth_calls(), 1);
    assert_eq!(run.transport.forwards(), 1);
    assert_eq!(run.transport.closes(), 1);
    assert_eq!(BeaconError::from(err).exit_code(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_port_conflict_can_proceed_without_tunnel() {
    let transport = StubTransport::new().occupy_port(8080);
    let mut settings = settings(5);
    settings.tunnel_conflict = TunnelConflictPolicy::Proceed;
    let mut run = start(transport, settings, Some(TunnelSpec::mirrored(8080)));

    let seen = events_until(&mut run.events, entered(SupervisorState::Active)).await;
    assert!(seen.contains(&SupervisorEvent::TunnelUnavailable { port: 8080 }));

    run.cancel.cancel();
    assert!(run.handle.await.unwrap().is_ok());
    assert_eq!(run.transport.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tunnel_is_restored_after_reconnect() {
    let transport = StubTransport::new().script_probes(vec![reset()]);
    let mut run = start(transport, settings(5), Some(TunnelSpec::mirrored(8080)));

    events_until(&mut run.events, entered(SupervisorState::Active)).await;
    events_until(&mut run.events, entered(SupervisorState::Active)).await;
    assert_eq!(run.transport.forwards(), 2);
    assert!(run.transport.is_bound(8080));

    run.cancel.cancel();
    assert!(run.handle.await.unwrap().is_ok());
    assert_eq!(run.transport.closes(), 2);
    assert!(!run.transport.is_bound(8080));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let transport = StubTransport::new()
        .script_probes(vec![reset()])
        .script_connects(vec![None, reset(), reset()]);
    let run = start(transport, settings(2), None);

    let err = run.handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::ReconnectExhausted { attempts: 2, .. }
    ));
    assert_eq!(run.transport.auth_calls(), 3);
    assert_eq!(run.transport.closes(), 1);
    assert_eq!(BeaconError::from(err).exit_code(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_connect_attempt_closes_nothing() {
    let transport = StubTransport::new().with_connect_delay(Duration::from_secs(60));
    let mut run = start(transport, settings(5), None);

    events_until(&mut run.events, entered(SupervisorState::Connecting)).await;
    let cancelled_at = Instant::now();
    run.cancel.cancel();

    assert!(run.handle.await.unwrap().is_ok());
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(run.transport.auth_calls(), 1);
    assert_eq!(run.transport.closes(), 0);

    let rest = events_until(&mut run.events, entered(SupervisorState::Closed)).await;
    assert_eq!(
        transitions(&rest),
        vec![(SupervisorState::Connecting, SupervisorState::Closed)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_initial_retry_wait() {
    let transport = StubTransport::new().script_connects(vec![reset()]);
    let mut run = start(transport, settings(5), None);

    events_until(&mut run.events, |e| {
        matches!(e, SupervisorEvent::ReconnectScheduled { attempt: 1, .. })
    })
    .await;
    let cancelled_at = Instant::now();
    run.cancel.cancel();

    assert!(run.handle.await.unwrap().is_ok());
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(run.transport.auth_calls(), 1);
    assert_eq!(run.transport.closes(), 0);

    let rest = events_until(&mut run.events, entered(SupervisorState::Closed)).await;
    assert_eq!(
        transitions(&rest),
        vec![(SupervisorState::Connecting, SupervisorState::Closed)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_gives_up_after_max_attempts() {
    let transport = StubTransport::new().script_connects(vec![reset(), reset(), reset()]);
    let mut run = start(transport, settings(2), None);

    let err = run.handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::Transient { .. })
    ));
    assert_eq!(run.transport.auth_calls(), 3);
    assert_eq!(run.transport.closes(), 0);
    assert_eq!(BeaconError::from(err).exit_code(), 4);

    let seen = events_until(&mut run.events, entered(SupervisorState::Closed)).await;
    assert_eq!(
        delays(&seen),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(
        transitions(&seen),
        vec![
            (SupervisorState::Idle, SupervisorState::Connecting),
            (SupervisorState::Connecting, SupervisorState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_tunnel_request_times_out_and_closes_session() {
    let transport = StubTransport::new().with_forward_delay(Duration::from_secs(60));
    let started = Instant::now();
    let run = start(transport, settings(1), Some(TunnelSpec::mirrored(8080)));

    let err = run.handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Tunnel(TunnelError::Failed {
            port: 8080,
            source: TransportError::Timeout,
        })
    ));
    // Two attempts, each cut off by the 10s probe timeout, 1s apart
    assert!(started.elapsed() >= Duration::from_secs(21));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(run.transport.auth_calls(), 2);
    assert_eq!(run.transport.forwards(), 2);
    assert_eq!(run.transport.closes(), 2);
    assert_eq!(BeaconError::from(err).exit_code(), 5);
}
