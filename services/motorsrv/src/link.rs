//! Motor link connection manager
//!
//! Owns the single Modbus session to the drive. Every register operation
//! goes through [`MotorLink`], which serializes access with a mutex and
//! turns transport failures into state transitions:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |            |
//!                     v            v
//!                  Faulted <-------+
//!                     |
//!                     +--(backoff)--> Connecting
//! ```
//!
//! Reconnection is driven by one supervisor task (see [`MotorLink::start_supervisor`]).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rig_modbus::{LinkConnector, LinkError, RegisterTransport, Result};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reconnect::{ReconnectHelper, ReconnectPolicy, ReconnectStats};

const TRANSITION_CAPACITY: usize = 64;

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Faulted)
                | (Connected, Faulted)
                | (Faulted, Connecting)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Faulted, Disconnected)
        )
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "DISCONNECTED"),
            LinkState::Connecting => write!(f, "CONNECTING"),
            LinkState::Connected => write!(f, "CONNECTED"),
            LinkState::Faulted => write!(f, "FAULTED"),
        }
    }
}

/// Snapshot published on every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Id of the most recent session (0 before the first connect)
    pub session: u64,
    pub since: chrono::DateTime<chrono::Utc>,
}

impl LinkStatus {
    fn initial() -> Self {
        Self {
            state: LinkState::Disconnected,
            reason: None,
            session: 0,
            since: chrono::Utc::now(),
        }
    }
}

type Session = Option<Box<dyn RegisterTransport>>;

/// Single logical connection to the motor controller
pub struct MotorLink {
    connector: Arc<dyn LinkConnector>,
    /// `Some` exactly while the state is Connected
    session: Mutex<Session>,
    state_tx: watch::Sender<LinkStatus>,
    transitions: broadcast::Sender<LinkStatus>,
    op_timeout: Duration,
    policy: ReconnectPolicy,
    supervisor_started: AtomicBool,
    session_counter: AtomicU64,
    reconnect_stats: RwLock<ReconnectStats>,
}

impl std::fmt::Debug for MotorLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorLink")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl MotorLink {
    pub fn new(
        connector: Arc<dyn LinkConnector>,
        policy: ReconnectPolicy,
        op_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkStatus::initial());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            connector,
            session: Mutex::new(None),
            state_tx,
            transitions,
            op_timeout,
            policy,
            supervisor_started: AtomicBool::new(false),
            session_counter: AtomicU64::new(0),
            reconnect_stats: RwLock::new(ReconnectStats::default()),
        }
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn state(&self) -> LinkState {
        self.state_tx.borrow().state
    }

    pub fn status(&self) -> LinkStatus {
        self.state_tx.borrow().clone()
    }

    /// Current status, updated in place (intermediate states may be skipped)
    pub fn subscribe_state(&self) -> watch::Receiver<LinkStatus> {
        self.state_tx.subscribe()
    }

    /// Every transition, in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<LinkStatus> {
        self.transitions.subscribe()
    }

    pub fn session_id(&self) -> u64 {
        self.session_counter.load(Ordering::Acquire)
    }

    pub async fn reconnect_stats(&self) -> ReconnectStats {
        self.reconnect_stats.read().await.clone()
    }

    /// Apply a transition. Callers hold the session lock.
    fn transition(&self, next: LinkState, reason: Option<String>) -> bool {
        let current = self.state_tx.borrow().state;
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!("[STATUS] illegal {} -> {} ignored", current, next);
            return false;
        }

        let status = LinkStatus {
            state: next,
            reason,
            session: self.session_id(),
            since: chrono::Utc::now(),
        };
        match (&status.reason, next) {
            (Some(reason), LinkState::Faulted) => {
                warn!("[STATUS] {} -> {} - {}", current, next, reason)
            },
            (Some(reason), _) => info!("[STATUS] {} -> {} - {}", current, next, reason),
            (None, _) => info!("[STATUS] {} -> {}", current, next),
        }

        self.state_tx.send_replace(status.clone());
        // No subscribers is fine
        let _ = self.transitions.send(status);
        true
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state().is_connected() {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    fn connect_timeout(&self) -> Duration {
        // TCP connect and the handshake probe are each bounded by op_timeout
        self.op_timeout * 2
    }

    /// One connect attempt: Connecting, then Connected or Faulted.
    ///
    /// Normally driven by the supervisor. Returns immediately if a session is open.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let endpoint = self.connector.endpoint();
        self.transition(LinkState::Connecting, None);
        info!("[CONNECT] {}", endpoint);

        let result = match timeout(self.connect_timeout(), self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::timeout(format!(
                "Connect to {endpoint} timed out"
            ))),
        };

        match result {
            Ok(transport) => {
                *session = Some(transport);
                self.session_counter.fetch_add(1, Ordering::AcqRel);
                self.transition(LinkState::Connected, None);
                Ok(())
            },
            Err(e) => {
                self.transition(LinkState::Faulted, Some(e.to_string()));
                Err(e)
            },
        }
    }

    /// FC03 on the current session
    pub async fn read_registers(self: &Arc<Self>, address: u16, count: u16) -> Result<Vec<u16>> {
        self.ensure_connected()?;
        let link = Arc::clone(self);
        // Detached so a dropped caller cannot cut a request off mid-exchange
        let exchange = tokio::spawn(async move {
            let mut session = link.session.lock().await;
            let transport = session.as_mut().ok_or(LinkError::NotConnected)?;

            let result =
                match timeout(link.op_timeout, transport.read_holding_registers(address, count))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LinkError::timeout(format!(
                        "Read {address}x{count} timed out"
                    ))),
                };

            if let Err(e) = &result {
                link.handle_op_error(&mut session, e).await;
            }
            result
        });
        join_exchange(exchange).await
    }

    /// FC06 on the current session
    pub async fn write_register(self: &Arc<Self>, address: u16, value: u16) -> Result<()> {
        self.ensure_connected()?;
        let link = Arc::clone(self);
        let exchange = tokio::spawn(async move {
            let mut session = link.session.lock().await;
            let transport = session.as_mut().ok_or(LinkError::NotConnected)?;

            let result =
                match timeout(link.op_timeout, transport.write_single_register(address, value))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LinkError::timeout(format!(
                        "Write {address}={value} timed out"
                    ))),
                };

            if let Err(e) = &result {
                link.handle_op_error(&mut session, e).await;
            }
            result
        });
        join_exchange(exchange).await
    }

    async fn handle_op_error(&self, session: &mut Session, err: &LinkError) {
        if err.needs_reconnect() {
            if let Some(mut transport) = session.take() {
                transport.close().await;
            }
            self.transition(LinkState::Faulted, Some(err.to_string()));
        } else {
            debug!("Link: session kept after {}", err);
        }
    }

    async fn fault_locked(&self, session: &mut Session, reason: String) -> bool {
        if !self.state().is_connected() {
            return false;
        }
        if let Some(mut transport) = session.take() {
            transport.close().await;
        }
        self.transition(LinkState::Faulted, Some(reason))
    }

    /// Drop the current session and enter Faulted. No-op unless Connected.
    pub async fn mark_faulted(&self, reason: impl Into<String>) -> bool {
        let mut session = self.session.lock().await;
        self.fault_locked(&mut session, reason.into()).await
    }

    /// Like [`mark_faulted`](Self::mark_faulted), but only if `session_id`
    /// is still the current session.
    pub async fn mark_session_faulted(&self, session_id: u64, reason: impl Into<String>) -> bool {
        let mut session = self.session.lock().await;
        if self.session_id() != session_id {
            debug!(
                "Link: fault for stale session {} ignored (current {})",
                session_id,
                self.session_id()
            );
            return false;
        }
        self.fault_locked(&mut session, reason.into()).await
    }

    /// Close the session and enter Disconnected
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut transport) = session.take() {
            transport.close().await;
        }
        self.transition(LinkState::Disconnected, Some("shutdown".to_string()));
    }

    /// Spawn the reconnect supervisor. Returns `None` if it is already running.
    pub fn start_supervisor(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self
            .supervisor_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Link supervisor already running");
            return None;
        }

        let link = Arc::clone(self);
        Some(tokio::spawn(async move { link.supervise(cancel).await }))
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut helper = ReconnectHelper::new(self.policy.clone());
        let mut state_rx = self.state_tx.subscribe();
        debug!("Link supervisor started: {}", self.connector.endpoint());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let state = state_rx.borrow_and_update().state;
            let wait = match state {
                LinkState::Connected | LinkState::Connecting => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                },
                LinkState::Disconnected => Duration::ZERO,
                LinkState::Faulted => helper.next_wait(),
            };

            if !wait.is_zero() {
                info!(
                    "[RETRY] reconnect in {}ms (failures: {})",
                    wait.as_millis(),
                    helper.consecutive_failures()
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            helper.record_attempt();
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.connect() => result,
            };
            match attempt {
                Ok(()) => helper.record_success(),
                Err(e) => {
                    helper.record_failure();
                    warn!("[RETRY] attempt failed: {}", e);
                },
            }
            *self.reconnect_stats.write().await = helper.stats().clone();
        }

        debug!("Link supervisor stopped");
    }
}

async fn join_exchange<T>(exchange: JoinHandle<Result<T>>) -> Result<T> {
    match exchange.await {
        Ok(result) => result,
        Err(e) => Err(LinkError::io(format!("Register exchange aborted: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_utils::FakeRig;
    use tokio::time::Instant;

    fn link_for(rig: &FakeRig) -> Arc<MotorLink> {
        Arc::new(MotorLink::new(
            rig.connector(),
            ReconnectPolicy::default(),
            Duration::from_millis(2000),
        ))
    }

    async fn next_state(rx: &mut broadcast::Receiver<LinkStatus>) -> LinkState {
        rx.recv().await.unwrap().state
    }

    #[test]
    fn test_transition_table() {
        use LinkState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Faulted));
        assert!(Connected.can_transition_to(Faulted));
        assert!(Faulted.can_transition_to(Connecting));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Faulted.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LinkState::Faulted.to_string(), "FAULTED");
        assert_eq!(
            serde_json::to_value(LinkState::Connected).unwrap(),
            serde_json::json!("connected")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_when_disconnected() {
        let rig = FakeRig::new();
        let link = link_for(&rig);

        assert_eq!(
            link.read_registers(100, 1).await.unwrap_err(),
            LinkError::NotConnected
        );
        assert_eq!(
            link.write_register(100, 3510).await.unwrap_err(),
            LinkError::NotConnected
        );
        assert_eq!(rig.read_count().await, 0);
        assert!(rig.writes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_read() {
        let rig = FakeRig::new();
        rig.set_register(100, 1350).await;
        let link = link_for(&rig);
        let mut transitions = link.subscribe_transitions();

        link.connect().await.unwrap();
        assert_eq!(next_state(&mut transitions).await, LinkState::Connecting);
        assert_eq!(next_state(&mut transitions).await, LinkState::Connected);
        assert_eq!(link.session_id(), 1);

        assert_eq!(link.read_registers(100, 1).await.unwrap(), vec![1350]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_faults() {
        let rig = FakeRig::new();
        rig.fail_next_connects(1).await;
        let link = link_for(&rig);

        assert!(link.connect().await.is_err());
        let status = link.status();
        assert_eq!(status.state, LinkState::Faulted);
        assert!(status.reason.unwrap().contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_error_drops_session() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        link.connect().await.unwrap();

        rig.fail_next_reads([LinkError::io("connection reset")]).await;
        assert!(link.read_registers(100, 1).await.is_err());
        assert_eq!(link.state(), LinkState::Faulted);

        // Fails fast from now on
        assert_eq!(
            link.read_registers(100, 1).await.unwrap_err(),
            LinkError::NotConnected
        );
        assert_eq!(rig.read_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exception_keeps_session() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        link.connect().await.unwrap();

        rig.fail_next_writes([LinkError::Exception {
            function: 0x06,
            code: 0x03,
        }])
        .await;
        assert!(link.write_register(100, 3510).await.is_err());
        assert_eq!(link.state(), LinkState::Connected);
        assert!(link.write_register(100, 3510).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_faults() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        link.connect().await.unwrap();

        rig.set_latency(Duration::from_secs(5)).await;
        let started = Instant::now();
        let err = link.read_registers(100, 1).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
        assert_eq!(link.state(), LinkState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_faulted_idempotent() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        link.connect().await.unwrap();
        let mut transitions = link.subscribe_transitions();

        assert!(link.mark_faulted("poll failed").await);
        assert!(!link.mark_faulted("poll failed").await);

        let status = transitions.recv().await.unwrap();
        assert_eq!(status.state, LinkState::Faulted);
        assert_eq!(status.reason.as_deref(), Some("poll failed"));
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_fault_ignored() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        link.connect().await.unwrap();
        let first = link.session_id();

        link.mark_faulted("drop").await;
        link.connect().await.unwrap();
        assert_ne!(link.session_id(), first);

        assert!(!link.mark_session_faulted(first, "late").await);
        assert_eq!(link.state(), LinkState::Connected);
        assert!(link.mark_session_faulted(link.session_id(), "now").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_never_overlap() {
        let rig = FakeRig::new();
        rig.set_latency(Duration::from_millis(50)).await;
        let link = link_for(&rig);
        link.connect().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8u16 {
            let link = Arc::clone(&link);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    link.read_registers(100, 1).await.map(|_| ())
                } else {
                    link.write_register(100, 3510 + i).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(rig.max_in_flight().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_write_still_completes() {
        let rig = FakeRig::new();
        rig.set_register(100, 1350).await;
        rig.set_latency(Duration::from_millis(200)).await;
        let link = link_for(&rig);
        link.connect().await.unwrap();
        let session = link.session_id();

        // Caller gives up while the request is on the wire
        let abandoned = timeout(Duration::from_millis(50), link.write_register(100, 3510)).await;
        assert!(abandoned.is_err());
        assert_eq!(link.state(), LinkState::Connected);

        // Queues behind the write and sees its value
        assert_eq!(link.read_registers(100, 1).await.unwrap(), vec![3510]);
        assert_eq!(rig.writes().await, vec![(100, 3510)]);
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.session_id(), session);
        assert_eq!(rig.closed_sessions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_single_instance() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        let cancel = CancellationToken::new();

        let handle = link.start_supervisor(cancel.clone());
        assert!(handle.is_some());
        assert!(link.start_supervisor(cancel.clone()).is_none());

        cancel.cancel();
        handle.unwrap().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_reconnects_after_backoff() {
        let rig = FakeRig::new();
        rig.fail_next_connects(2).await;
        let link = link_for(&rig);
        let mut transitions = link.subscribe_transitions();
        let cancel = CancellationToken::new();
        let handle = link.start_supervisor(cancel.clone()).unwrap();

        let started = Instant::now();
        let mut states = Vec::new();
        loop {
            let state = next_state(&mut transitions).await;
            states.push(state);
            if state == LinkState::Connected {
                break;
            }
        }

        use LinkState::*;
        assert_eq!(
            states,
            vec![Connecting, Faulted, Connecting, Faulted, Connecting, Connected]
        );
        // First attempt is immediate, then two fixed 3 s backoffs
        assert_eq!(started.elapsed(), Duration::from_millis(6000));
        assert_eq!(rig.connect_count().await, 3);

        let stats = link.reconnect_stats().await;
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.failed_reconnects, 2);
        assert_eq!(stats.successful_reconnects, 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_disconnects() {
        let rig = FakeRig::new();
        let link = link_for(&rig);
        link.connect().await.unwrap();

        link.close().await;
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(rig.closed_sessions().await, 1);
    }
}
