//! Connection Manager
//!
//! Owns the lifetime of one live feed for one session identifier:
//!
//! ```text
//! Idle ──► Connecting ──► Open ◄──► Reconnecting
//!              │                        │
//!              └──────────► Closed ◄────┘   (cancelled, or retries exhausted)
//! ```
//!
//! `ConnectionOpened` is emitted on the first successful connect only; a
//! reconnection is silent, so events missed during the gap are simply absent.
//! `ConnectionClosed` is emitted exactly once, when the manager settles in
//! `Closed`. Cancellation interrupts both the transport and the backoff timer.
//!
//! The retry budget only refills once a connection has delivered a message.
//! A server that accepts the socket and drops it straight away keeps
//! consuming attempts, and its backoff keeps growing.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{FeedStream, FeedTransport};

/// Lifecycle of a single feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// What the manager hands downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent {
    Opened,
    Message(String),
    Closed,
}

/// Capped exponential backoff with a bounded number of attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(10),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self
            .factor
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

enum PumpOutcome {
    Cancelled,
    ReceiverGone,
    /// `delivered` is set once at least one message was forwarded
    Dropped { reason: String, delivered: bool },
}

/// Drives one feed from `Idle` to `Closed`.
pub struct ConnectionManager<T> {
    transport: Arc<T>,
    session_id: String,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T: FeedTransport> ConnectionManager<T> {
    pub fn new(
        transport: Arc<T>,
        session_id: String,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            transport,
            session_id,
            policy,
            cancel,
            state_tx,
        }
    }

    /// Observe state transitions. The last state stays readable after the
    /// manager has finished.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run until cancelled or the retry budget is spent.
    pub async fn run(self, events: mpsc::Sender<FeedEvent>) {
        let mut attempt = 0u32;
        let mut announced = false;
        self.set_state(ConnectionState::Connecting);

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(&self.session_id) => result,
            };

            match connected {
                Ok(mut stream) => {
                    if attempt > 0 {
                        info!(session = %self.session_id, attempt, "feed re-established");
                    }
                    self.set_state(ConnectionState::Open);

                    if !announced {
                        announced = true;
                        let sent = tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            sent = events.send(FeedEvent::Opened) => sent,
                        };
                        if sent.is_err() {
                            break;
                        }
                    }

                    match self.pump(&mut stream, &events).await {
                        PumpOutcome::Cancelled | PumpOutcome::ReceiverGone => break,
                        PumpOutcome::Dropped { reason, delivered } => {
                            warn!(session = %self.session_id, reason = %reason, delivered, "feed dropped");
                            if delivered {
                                attempt = 0;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(session = %self.session_id, attempt, error = %e, "feed connect failed");
                }
            }

            attempt += 1;
            if attempt > self.policy.max_retries {
                info!(
                    session = %self.session_id,
                    retries = self.policy.max_retries,
                    "giving up on feed"
                );
                break;
            }

            let delay = self.policy.delay_for(attempt);
            self.set_state(ConnectionState::Reconnecting { attempt });
            debug!(
                session = %self.session_id,
                attempt,
                delay = ?delay,
                "scheduling reconnection"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        // The receiver may already be gone after a teardown
        let _ = events.send(FeedEvent::Closed).await;
    }

    /// Forward messages until the stream ends, errors, or we are cancelled.
    async fn pump(&self, stream: &mut FeedStream, events: &mpsc::Sender<FeedEvent>) -> PumpOutcome {
        let mut delivered = false;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                next = stream.next() => next,
            };

            let reason = match next {
                Some(Ok(raw)) => {
                    // A full channel must not hold up a teardown
                    let sent = tokio::select! {
                        _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                        sent = events.send(FeedEvent::Message(raw)) => sent,
                    };
                    if sent.is_err() {
                        return PumpOutcome::ReceiverGone;
                    }
                    delivered = true;
                    continue;
                }
                Some(Err(e)) => e.to_string(),
                None => "stream ended".to_string(),
            };
            return PumpOutcome::Dropped { reason, delivered };
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(session = %self.session_id, from = ?previous, to = ?state, "connection state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedTransport, fast_policy, recv_event};

    async fn collect_until_closed(rx: &mut mpsc::Receiver<FeedEvent>) -> Vec<FeedEvent> {
        let mut seen = Vec::new();
        loop {
            let event = recv_event(rx).await;
            let done = event == FeedEvent::Closed;
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn test_backoff_survives_huge_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
        assert_eq!(policy.delay_for(0), policy.base_delay);
    }

    #[test]
    fn test_is_connected_only_when_open() {
        assert!(ConnectionState::Open.is_connected());
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_connected());
        assert!(!ConnectionState::Closed.is_connected());
        assert!(!ConnectionState::Idle.is_connected());
    }

    #[tokio::test]
    async fn test_open_forwards_messages() {
        let transport = Arc::new(ScriptedTransport::new());
        let feed = transport.push_feed();
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(3),
            cancel.clone(),
        );
        let mut state_rx = manager.subscribe_state();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Opened);
        feed.send_raw("hello");
        assert_eq!(
            recv_event(&mut rx).await,
            FeedEvent::Message("hello".to_string())
        );
        assert_eq!(*state_rx.borrow_and_update(), ConnectionState::Open);
        assert_eq!(transport.connected_sessions(), vec!["s1".to_string()]);

        cancel.cancel();
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Closed);
        task.await.unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_is_silent() {
        let transport = Arc::new(ScriptedTransport::new());
        let first = transport.push_feed();
        let second = transport.push_feed();
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(3),
            cancel.clone(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Opened);
        first.send_raw("one");
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Message("one".into()));
        first.disconnect();

        second.send_raw("two");
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Message("two".into()));
        assert_eq!(transport.connect_count(), 2);

        cancel.cancel();
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Closed);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_failure_then_success_announces_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_refusal();
        let feed = transport.push_feed();
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(3),
            cancel.clone(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Opened);
        feed.send_raw("x");
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Message("x".into()));
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        // Nothing scripted: every connect is refused
        let transport = Arc::new(ScriptedTransport::new());
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(2),
            CancellationToken::new(),
        );
        let state_rx = manager.subscribe_state();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        assert_eq!(collect_until_closed(&mut rx).await, vec![FeedEvent::Closed]);
        task.await.unwrap();
        // First attempt plus two retries
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(*state_rx.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_successful_reconnect_resets_budget() {
        let transport = Arc::new(ScriptedTransport::new());
        let first = transport.push_feed();
        transport.push_refusal();
        let second = transport.push_feed();
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(2),
            CancellationToken::new(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Opened);
        first.send_raw("hello");
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Message("hello".into()));
        first.disconnect();
        second.send_raw("back");
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Message("back".into()));
        second.disconnect();

        // Budget of two fresh retries, both refused, then closed
        assert_eq!(collect_until_closed(&mut rx).await, vec![FeedEvent::Closed]);
        task.await.unwrap();
        assert_eq!(transport.connect_count(), 5);
    }

    #[tokio::test]
    async fn test_accept_then_drop_consumes_budget() {
        let transport = Arc::new(ScriptedTransport::new());
        // Every connect is accepted and immediately hung up
        for _ in 0..10 {
            transport.push_feed().disconnect();
        }
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(2),
            CancellationToken::new(),
        );
        let mut state_rx = manager.subscribe_state();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        let mut attempts = Vec::new();
        while state_rx.changed().await.is_ok() {
            match *state_rx.borrow_and_update() {
                ConnectionState::Reconnecting { attempt } => attempts.push(attempt),
                ConnectionState::Closed => break,
                _ => {}
            }
        }

        assert_eq!(
            collect_until_closed(&mut rx).await,
            vec![FeedEvent::Opened, FeedEvent::Closed]
        );
        task.await.unwrap();
        assert_eq!(transport.connect_count(), 3);
        // Backoff keeps growing instead of restarting at the base delay
        assert_eq!(attempts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_delivery() {
        let transport = Arc::new(ScriptedTransport::new());
        let feed = transport.push_feed();
        feed.send_raw("one");
        feed.send_raw("two");
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            transport.clone(),
            "s1".to_string(),
            fast_policy(3),
            cancel.clone(),
        );
        let mut state_rx = manager.subscribe_state();
        // Room for `Opened` only; the first message blocks
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(manager.run(tx));

        state_rx
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Opened);
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Closed);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("manager should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let transport = Arc::new(ScriptedTransport::new());
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            ..ReconnectPolicy::default()
        };
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(transport, "s1".to_string(), policy, cancel.clone());
        let mut state_rx = manager.subscribe_state();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(manager.run(tx));

        state_rx
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        cancel.cancel();
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Closed);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("manager should stop promptly")
            .unwrap();
    }
}
