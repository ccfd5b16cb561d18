//! Shared test utilities: an in-memory feed transport with scripted sessions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::connection::{FeedEvent, ReconnectPolicy};
use crate::error::FeedError;
use crate::transport::{FeedStream, FeedTransport};

enum Script {
    Refuse,
    Feed(mpsc::UnboundedReceiver<Result<String, FeedError>>),
}

/// Each `connect` consumes the next scripted outcome; once the script runs
/// out every connect is refused.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
    sessions: Mutex<Vec<String>>,
}

/// Server side of one scripted feed.
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<Result<String, FeedError>>,
}

impl FeedHandle {
    pub fn send_raw(&self, raw: &str) {
        let _ = self.tx.send(Ok(raw.to_string()));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_raw(&value.to_string());
    }

    /// End the stream as if the server went away.
    pub fn disconnect(self) {
        drop(self);
    }

    /// Fail the stream with a transport error.
    pub fn fail(self) {
        let _ = self.tx.send(Err(FeedError::Closed));
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_feed(&self) -> FeedHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(Script::Feed(rx));
        FeedHandle { tx }
    }

    pub fn push_refusal(&self) {
        self.script.lock().unwrap().push_back(Script::Refuse);
    }

    pub fn connect_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn connected_sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

impl FeedTransport for ScriptedTransport {
    async fn connect(&self, session_id: &str) -> Result<FeedStream, FeedError> {
        self.sessions.lock().unwrap().push(session_id.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Feed(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Script::Refuse) | None => Err(FeedError::Unavailable),
        }
    }
}

/// Millisecond backoff so reconnect tests finish quickly.
pub fn fast_policy(max_retries: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(5),
        factor: 2,
        max_delay: Duration::from_millis(20),
        max_retries,
    }
}

pub async fn recv_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for feed event")
        .expect("feed channel closed")
}
