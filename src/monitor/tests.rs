//! Loop tests against scripted in-memory ClientQuery peers

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::machine::{Phase, INPUT_MUTED_FLAG};
use super::runner::{CycleFailure, CycleOutcome, MonitorLoop, MonitorSettings};
use crate::error::{Error, FailureKind, Result};
use crate::events::MonitorEvent;
use crate::hass::{Action, StateBridge};
use crate::telnet::{Dialer, Endpoint};

/// Behaviour of one scripted client connection
#[derive(Debug, Clone, Copy)]
enum Peer {
    Healthy {
        input: &'static str,
        output: &'static str,
    },
    BadGreeting,
    RejectAuth,
    NoClid,
    /// Accepts commands but never answers `auth`
    Silent,
}

/// Hands out one scripted peer per dial, refusing once they run out
#[derive(Default)]
struct ScriptedDialer {
    peers: Mutex<VecDeque<Peer>>,
    dials: AtomicUsize,
}

impl ScriptedDialer {
    fn new(peers: impl IntoIterator<Item = Peer>) -> Self {
        Self {
            peers: Mutex::new(peers.into_iter().collect()),
            dials: AtomicUsize::new(0),
        }
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for Arc<ScriptedDialer> {
    type Stream = DuplexStream;

    async fn dial(&self, _endpoint: &Endpoint) -> io::Result<DuplexStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let peer = self.peers.lock().unwrap().pop_front();
        let peer = peer.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no scripted peer left")
        })?;

        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve(server, peer));
        Ok(client)
    }
}

/// Replies the way the real client does, with `\n\r` line separators
async fn serve(stream: DuplexStream, peer: Peer) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    let greeting = match peer {
        Peer::BadGreeting => "Welcome\n\r",
        _ => "TS3 Client\n\rWelcome to the TeamSpeak 3 ClientQuery interface\n\r",
    };
    if write.write_all(greeting.as_bytes()).await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        let reply = if line.starts_with("auth ") {
            match peer {
                Peer::RejectAuth => Some("error id=256 msg=invalid\\sapikey\n\r".to_string()),
                Peer::Silent => None,
                _ => Some("error id=0 msg=ok\n\r".to_string()),
            }
        } else if line == "whoami" {
            match peer {
                Peer::NoClid => Some("error id=0 msg=ok\n\r".to_string()),
                _ => Some("clid=7 cid=1\n\rerror id=0 msg=ok\n\r".to_string()),
            }
        } else if let (Peer::Healthy { input, output }, Some(flag)) =
            (peer, line.strip_prefix("clientvariable clid=7 "))
        {
            let value = if flag == INPUT_MUTED_FLAG { input } else { output };
            Some(format!("clid=7 {flag}={value}\n\rerror id=0 msg=ok\n\r"))
        } else {
            Some("error id=256 msg=command\\snot\\sfound\n\r".to_string())
        };

        if let Some(reply) = reply {
            if write.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Records successful pushes, optionally failing the first few
struct RecordingBridge {
    initial: Option<&'static str>,
    pushes: Mutex<Vec<Action>>,
    failures_left: AtomicUsize,
}

impl RecordingBridge {
    fn new(initial: &'static str) -> Arc<Self> {
        Arc::new(Self {
            initial: Some(initial),
            pushes: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
        })
    }

    fn pushes(&self) -> Vec<Action> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateBridge for RecordingBridge {
    async fn get_state(&self) -> Result<String> {
        self.initial
            .map(str::to_string)
            .ok_or_else(|| Error::Transport("HTTP 502 - Bad Gateway".into()))
    }

    async fn set_state(&self, action: Action) -> Result<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Transport("HTTP 503 - Service Unavailable".into()));
        }
        self.pushes.lock().unwrap().push(action);
        Ok(())
    }
}

fn settings() -> MonitorSettings {
    MonitorSettings::new(Endpoint::parse("localhost:25639").unwrap(), "KEY-1")
}

async fn start(
    peers: impl IntoIterator<Item = Peer>,
    bridge: &Arc<RecordingBridge>,
) -> (
    MonitorLoop<Arc<ScriptedDialer>, RecordingBridge>,
    Arc<ScriptedDialer>,
    broadcast::Receiver<MonitorEvent>,
) {
    let dialer = Arc::new(ScriptedDialer::new(peers));
    let (event_tx, event_rx) = broadcast::channel(16);
    let monitor = MonitorLoop::start(settings(), Arc::clone(&dialer), Arc::clone(bridge), event_tx)
        .await
        .unwrap();
    (monitor, dialer, event_rx)
}

fn healthy(input: &'static str, output: &'static str) -> Peer {
    Peer::Healthy { input, output }
}

#[tokio::test]
async fn test_start_seeds_last_known_state() {
    let (monitor, _, _) = start([], &RecordingBridge::new("on")).await;
    assert!(monitor.last_known());
    assert_eq!(monitor.phase(), Phase::Idle);

    let (monitor, _, _) = start([], &RecordingBridge::new("off")).await;
    assert!(!monitor.last_known());
}

#[tokio::test]
async fn test_failed_initial_read_is_surfaced() {
    let bridge = Arc::new(RecordingBridge {
        initial: None,
        pushes: Mutex::new(Vec::new()),
        failures_left: AtomicUsize::new(0),
    });
    let (event_tx, _) = broadcast::channel(16);

    let err = MonitorLoop::start(settings(), Arc::new(ScriptedDialer::default()), bridge, event_tx)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), FailureKind::Transport);
}

#[tokio::test]
async fn test_pushes_only_on_change() {
    let bridge = RecordingBridge::new("on");
    let peers = [
        healthy("0", "0"),
        healthy("0", "0"),
        healthy("1", "0"),
        healthy("0", "0"),
    ];
    let (mut monitor, _, _) = start(peers, &bridge).await;
    let cancel = CancellationToken::new();

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Unchanged { mic_active: true })
    );
    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Unchanged { mic_active: true })
    );
    assert!(bridge.pushes().is_empty());

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Pushed(Action::TurnOff))
    );
    assert_eq!(bridge.pushes(), vec![Action::TurnOff]);

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Pushed(Action::TurnOn))
    );
    assert_eq!(bridge.pushes(), vec![Action::TurnOff, Action::TurnOn]);
}

#[tokio::test]
async fn test_off_to_live_pushes_once() {
    let bridge = RecordingBridge::new("off");
    let (mut monitor, _, mut events) = start([healthy("0", "0"), healthy("0", "0")], &bridge).await;
    let cancel = CancellationToken::new();

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Pushed(Action::TurnOn))
    );
    assert_eq!(monitor.phase(), Phase::PushingState);
    assert_eq!(events.try_recv().unwrap(), MonitorEvent::MicActivated);

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Unchanged { mic_active: true })
    );
    assert_eq!(monitor.phase(), Phase::ComparingState);
    assert_eq!(bridge.pushes(), vec![Action::TurnOn]);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_muted_output_counts_as_inactive() {
    let bridge = RecordingBridge::new("on");
    let (mut monitor, _, _) = start([healthy("0", "1")], &bridge).await;

    assert_eq!(
        monitor.run_cycle(&CancellationToken::new()).await,
        Ok(CycleOutcome::Pushed(Action::TurnOff))
    );
    assert!(!monitor.last_known());
}

#[tokio::test]
async fn test_stage_failures_abandon_cycle() {
    let bridge = RecordingBridge::new("off");
    let peers = [Peer::BadGreeting, Peer::RejectAuth, Peer::NoClid];
    let (mut monitor, dialer, _) = start(peers, &bridge).await;
    let cancel = CancellationToken::new();

    assert_eq!(monitor.run_cycle(&cancel).await, Err(CycleFailure::Connect));
    assert_eq!(monitor.run_cycle(&cancel).await, Err(CycleFailure::Authenticate));
    assert_eq!(monitor.run_cycle(&cancel).await, Err(CycleFailure::ResolveIdentity));
    // Scripted peers exhausted, the dial itself is refused
    assert_eq!(monitor.run_cycle(&cancel).await, Err(CycleFailure::Connect));

    assert_eq!(dialer.dials(), 4);
    assert!(bridge.pushes().is_empty());
    assert!(!monitor.last_known());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_treated_like_protocol_failure() {
    let bridge = RecordingBridge::new("off");
    let (mut monitor, _, _) = start([Peer::Silent, healthy("0", "0")], &bridge).await;
    let cancel = CancellationToken::new();

    let started = tokio::time::Instant::now();
    assert_eq!(monitor.run_cycle(&cancel).await, Err(CycleFailure::Authenticate));
    assert!(started.elapsed() >= MonitorSettings::DEFAULT_OPERATION_TIMEOUT);

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Pushed(Action::TurnOn))
    );
}

#[tokio::test]
async fn test_failed_push_is_retried_next_cycle() {
    let bridge = RecordingBridge::new("off");
    bridge.failures_left.store(1, Ordering::SeqCst);
    let (mut monitor, _, _) = start([healthy("0", "0"), healthy("0", "0")], &bridge).await;
    let cancel = CancellationToken::new();

    assert_eq!(monitor.run_cycle(&cancel).await, Err(CycleFailure::Push));
    assert!(!monitor.last_known());

    assert_eq!(
        monitor.run_cycle(&cancel).await,
        Ok(CycleOutcome::Pushed(Action::TurnOn))
    );
    assert!(monitor.last_known());
    assert_eq!(bridge.pushes(), vec![Action::TurnOn]);
}

#[tokio::test(start_paused = true)]
async fn test_run_retries_until_cancelled() {
    let bridge = RecordingBridge::new("off");
    let (mut monitor, dialer, mut events) =
        start([Peer::RejectAuth, healthy("0", "0")], &bridge).await;
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        monitor.run(token).await;
        monitor
    });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    cancel.cancel();
    let monitor = handle.await.unwrap();

    assert_eq!(monitor.phase(), Phase::Stopped);
    assert_eq!(bridge.pushes(), vec![Action::TurnOn]);
    // Failed auth, push, then refused dials at 1s intervals
    assert_eq!(dialer.dials(), 4);

    assert_eq!(
        events.try_recv().unwrap(),
        MonitorEvent::CycleFailed {
            stage: "authenticate".into()
        }
    );
    assert_eq!(events.try_recv().unwrap(), MonitorEvent::MicActivated);
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert_eq!(last, Some(MonitorEvent::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_abandons_in_flight_cycle() {
    let bridge = RecordingBridge::new("off");
    let (mut monitor, _, _) = start([Peer::Silent], &bridge).await;
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        monitor.run(token).await;
        monitor
    });

    let started = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let monitor = handle.await.unwrap();

    assert!(started.elapsed() < MonitorSettings::DEFAULT_OPERATION_TIMEOUT);
    assert_eq!(monitor.phase(), Phase::Stopped);
    assert!(bridge.pushes().is_empty());
}

/// Reads `off` and never answers a push
struct StalledBridge;

#[async_trait]
impl StateBridge for StalledBridge {
    async fn get_state(&self) -> Result<String> {
        Ok("off".into())
    }

    async fn set_state(&self, _action: Action) -> Result<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_abandons_stalled_push() {
    let dialer = Arc::new(ScriptedDialer::new([healthy("0", "0")]));
    let (event_tx, mut events) = broadcast::channel(16);
    let mut monitor = MonitorLoop::start(settings(), Arc::clone(&dialer), Arc::new(StalledBridge), event_tx)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        monitor.run(token).await;
        monitor
    });

    let started = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let monitor = handle.await.unwrap();

    assert!(started.elapsed() < MonitorSettings::DEFAULT_OPERATION_TIMEOUT);
    assert_eq!(monitor.phase(), Phase::Stopped);
    assert!(!monitor.last_known());
    assert_eq!(dialer.dials(), 1);
    assert_eq!(
        events.try_recv().unwrap(),
        MonitorEvent::CycleFailed { stage: "push".into() }
    );
}
