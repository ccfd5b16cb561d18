//! Subscription Façade
//!
//! The public handle over one activity feed. Give it a session identifier and
//! it keeps an [`ActivitySnapshot`] current; give it `None` and it closes the
//! feed.
//!
//! The snapshot lives in a `watch` channel. The per-session pump task and
//! `set_processing` are its only writers, and every write happens under the
//! channel's write lock, so observers always see a consistent value.
//!
//! Each session change bumps a generation counter (while holding that same
//! lock) and resets the snapshot. Pump tasks carry the generation they were
//! started with and refuse to write once it is stale, so nothing from a
//! previous session can leak into the current snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ActivityConfig;
use crate::connection::{ConnectionManager, ConnectionState, FeedEvent};
use crate::event::{ActivityEvent, decode};
use crate::reducer::ActivitySnapshot;
use crate::transport::FeedTransport;

/// Buffered feed events between the connection manager and the reducer.
const FEED_CHANNEL_CAPACITY: usize = 256;

struct ActiveFeed {
    session_id: String,
    cancel: CancellationToken,
    manager: JoinHandle<()>,
}

/// Live activity state for (at most) one session at a time.
pub struct ActivitySubscription<T: FeedTransport> {
    transport: Arc<T>,
    config: ActivityConfig,
    snapshot_tx: Arc<watch::Sender<ActivitySnapshot>>,
    generation: Arc<AtomicU64>,
    connection_rx: watch::Receiver<ConnectionState>,
    feed: Option<ActiveFeed>,
}

/// Open a subscription, optionally already pointed at a session.
///
/// Must be called from within a tokio runtime when `session_id` is `Some`.
pub fn subscribe<T: FeedTransport>(
    transport: T,
    session_id: Option<String>,
    config: ActivityConfig,
) -> ActivitySubscription<T> {
    let mut subscription = ActivitySubscription::new(transport, config);
    subscription.set_session(session_id);
    subscription
}

impl<T: FeedTransport> ActivitySubscription<T> {
    pub fn new(transport: T, config: ActivityConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(ActivitySnapshot::with_limits(config.limits));
        Self {
            transport: Arc::new(transport),
            config,
            snapshot_tx: Arc::new(snapshot_tx),
            generation: Arc::new(AtomicU64::new(0)),
            connection_rx: detached_state(ConnectionState::Idle),
            feed: None,
        }
    }

    /// Current session identifier, if a feed is active.
    pub fn session_id(&self) -> Option<&str> {
        self.feed.as_ref().map(|f| f.session_id.as_str())
    }

    /// Point the subscription at a new session (or none).
    ///
    /// No-op when the identifier is unchanged. Otherwise the old feed is
    /// cancelled, the snapshot is reset, and a feed for the new identifier is
    /// opened.
    pub fn set_session(&mut self, session_id: Option<String>) {
        if self.session_id() == session_id.as_deref() {
            return;
        }

        self.teardown();
        let generation = self.reset_snapshot();

        let Some(session_id) = session_id else {
            self.connection_rx = detached_state(ConnectionState::Closed);
            return;
        };

        info!(session = %session_id, generation, "opening activity feed");
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            self.transport.clone(),
            session_id.clone(),
            self.config.reconnect.clone(),
            cancel.clone(),
        );
        self.connection_rx = manager.subscribe_state();

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        tokio::spawn(pump_feed(
            rx,
            self.snapshot_tx.clone(),
            self.generation.clone(),
            generation,
        ));
        let manager = tokio::spawn(manager.run(tx));

        self.feed = Some(ActiveFeed {
            session_id,
            cancel,
            manager,
        });
    }

    /// Close the feed and reset the snapshot.
    pub fn close(&mut self) {
        self.set_session(None);
    }

    /// Force the processing flag on, or clear it.
    ///
    /// Synchronous and independent of feed traffic; used to cover the gap
    /// between submitting a request and the first agent event.
    pub fn set_processing(&self, processing: bool) {
        self.snapshot_tx
            .send_if_modified(|snapshot| snapshot.set_processing(processing));
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> ActivitySnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Observe snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ActivitySnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Connection manager state for the current session.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_rx.borrow()
    }

    /// Observe connection state for the current session. Replaced on every
    /// session change.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_rx.clone()
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    fn teardown(&mut self) {
        if let Some(feed) = self.feed.take() {
            debug!(session = %feed.session_id, "cancelling activity feed");
            feed.cancel.cancel();
            // The manager observes the cancel at its next await point; no need to wait.
            drop(feed.manager);
        }
    }

    /// Bump the generation and clear the snapshot in one write.
    fn reset_snapshot(&self) -> u64 {
        let mut generation = 0;
        self.snapshot_tx.send_modify(|snapshot| {
            generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            snapshot.reset();
        });
        generation
    }
}

impl<T: FeedTransport> Drop for ActivitySubscription<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn detached_state(state: ConnectionState) -> watch::Receiver<ConnectionState> {
    let (_, rx) = watch::channel(state);
    rx
}

fn to_activity_event(event: FeedEvent) -> ActivityEvent {
    match event {
        FeedEvent::Opened => ActivityEvent::ConnectionOpened,
        FeedEvent::Closed => ActivityEvent::ConnectionClosed,
        FeedEvent::Message(raw) => decode(&raw),
    }
}

/// Decode and reduce feed events for one generation.
async fn pump_feed(
    mut rx: mpsc::Receiver<FeedEvent>,
    snapshot_tx: Arc<watch::Sender<ActivitySnapshot>>,
    generation: Arc<AtomicU64>,
    feed_generation: u64,
) {
    while let Some(event) = rx.recv().await {
        let event = to_activity_event(event);
        let kind = event.kind();

        let mut stale = false;
        snapshot_tx.send_if_modified(|snapshot| {
            if generation.load(Ordering::Acquire) != feed_generation {
                stale = true;
                return false;
            }
            snapshot.apply(event)
        });

        if stale {
            debug!(feed_generation, kind, "dropping event from a previous session");
            break;
        }
    }
}
