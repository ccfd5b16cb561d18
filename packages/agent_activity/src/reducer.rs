//! Activity State Reducer
//!
//! Folds the event sequence of one live feed into a single consistent
//! [`ActivitySnapshot`].
//!
//! ## Rules
//!
//! - `ConnectionOpened` / `ConnectionClosed` only toggle `is_connected`. A
//!   closed feed does not mean the agent stopped working.
//! - `AgentStarted` sets the active agent and marks processing.
//! - `AgentFinished` clears processing only when it names the active agent;
//!   finishes for any other agent are stale and dropped.
//! - `ThinkingFragment` is accepted only when its sequence is strictly greater
//!   than the last accepted sequence for the same agent, so duplicates and
//!   late arrivals are dropped and replay is a no-op.
//! - `Unknown` lands in the event log and nothing else.
//!
//! The processing flag has two writers: agent lifecycle events and the manual
//! override from the submission flow. They combine with OR; an explicit clear
//! resets both.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::event::{ActivityEvent, ThinkingFragment};

/// Default cap on the event log.
pub const DEFAULT_MAX_EVENTS: usize = 200;

/// Default cap on the thinking transcript.
pub const DEFAULT_MAX_THINKING_EVENTS: usize = 200;

/// Bounds for the snapshot's logs. Oldest entries are evicted first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLimits {
    pub max_events: usize,
    pub max_thinking_events: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            max_thinking_events: DEFAULT_MAX_THINKING_EVENTS,
        }
    }
}

/// Consumer-visible state of one activity subscription.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivitySnapshot {
    is_connected: bool,
    active_agent_id: Option<String>,
    active_agent_name: Option<String>,
    is_processing: bool,
    events: VecDeque<ActivityEvent>,
    thinking_events: VecDeque<ThinkingFragment>,
    last_thinking_message: Option<String>,

    /// An `AgentStarted` is waiting for its `AgentFinished`
    #[serde(skip)]
    agent_running: bool,
    /// Forced on by `set_processing(true)`
    #[serde(skip)]
    processing_override: bool,
    /// High-water sequence per agent. Never evicted, so it grows with the
    /// number of distinct agents seen in the session and is dropped on reset.
    #[serde(skip)]
    last_sequence: HashMap<String, u64>,
    #[serde(skip)]
    limits: LogLimits,
}

impl Default for ActivitySnapshot {
    fn default() -> Self {
        Self::with_limits(LogLimits::default())
    }
}

impl ActivitySnapshot {
    pub fn with_limits(limits: LogLimits) -> Self {
        Self {
            is_connected: false,
            active_agent_id: None,
            active_agent_name: None,
            is_processing: false,
            events: VecDeque::new(),
            thinking_events: VecDeque::new(),
            last_thinking_message: None,
            agent_running: false,
            processing_override: false,
            last_sequence: HashMap::new(),
            limits,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn active_agent_id(&self) -> Option<&str> {
        self.active_agent_id.as_deref()
    }

    pub fn active_agent_name(&self) -> Option<&str> {
        self.active_agent_name.as_deref()
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    /// Accepted events, oldest first.
    pub fn events(&self) -> &VecDeque<ActivityEvent> {
        &self.events
    }

    /// Accepted thinking fragments, oldest first.
    pub fn thinking_events(&self) -> &VecDeque<ThinkingFragment> {
        &self.thinking_events
    }

    pub fn last_thinking_message(&self) -> Option<&str> {
        self.last_thinking_message.as_deref()
    }

    pub fn limits(&self) -> LogLimits {
        self.limits
    }

    /// Apply one event in place.
    ///
    /// Returns `true` if the event was accepted (and therefore logged).
    pub fn apply(&mut self, event: ActivityEvent) -> bool {
        match &event {
            ActivityEvent::ConnectionOpened => self.is_connected = true,
            ActivityEvent::ConnectionClosed => self.is_connected = false,
            ActivityEvent::AgentStarted {
                agent_id,
                agent_name,
            } => {
                self.active_agent_id = Some(agent_id.clone());
                self.active_agent_name = Some(agent_name.clone());
                self.agent_running = true;
            }
            ActivityEvent::AgentFinished { agent_id } => {
                if self.active_agent_id.as_deref() != Some(agent_id.as_str()) {
                    debug!(agent_id = %agent_id, "ignoring finish for an agent that is not active");
                    return false;
                }
                self.active_agent_id = None;
                self.active_agent_name = None;
                self.agent_running = false;
                self.processing_override = false;
            }
            ActivityEvent::ThinkingFragment(fragment) => {
                let last = self.last_sequence.get(&fragment.agent_id).copied();
                if last.is_some_and(|last| fragment.sequence <= last) {
                    debug!(
                        agent_id = %fragment.agent_id,
                        sequence = fragment.sequence,
                        last = ?last,
                        "dropping duplicate or out-of-order thinking fragment"
                    );
                    return false;
                }
                self.last_sequence
                    .insert(fragment.agent_id.clone(), fragment.sequence);
                self.last_thinking_message = Some(fragment.text.clone());
                push_bounded(
                    &mut self.thinking_events,
                    fragment.clone(),
                    self.limits.max_thinking_events,
                );
            }
            ActivityEvent::Unknown { .. } => {}
        }

        self.sync_processing();
        push_bounded(&mut self.events, event, self.limits.max_events);
        true
    }

    /// Manual processing override.
    ///
    /// `true` forces processing on regardless of events. `false` clears both
    /// the override and the event-driven flag but keeps any agent identity an
    /// `AgentStarted` already set. Returns `true` if the flag changed.
    pub fn set_processing(&mut self, processing: bool) -> bool {
        let before = self.is_processing;
        self.processing_override = processing;
        if !processing {
            self.agent_running = false;
        }
        self.sync_processing();
        before != self.is_processing
    }

    /// Back to the empty snapshot, keeping the configured limits.
    pub fn reset(&mut self) {
        *self = Self::with_limits(self.limits);
    }

    fn sync_processing(&mut self) {
        self.is_processing = self.agent_running || self.processing_override;
    }
}

/// Pure form of [`ActivitySnapshot::apply`].
pub fn reduce(mut snapshot: ActivitySnapshot, event: ActivityEvent) -> ActivitySnapshot {
    snapshot.apply(event);
    snapshot
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, max_entries: usize) {
    if max_entries == 0 {
        return;
    }
    while buffer.len() >= max_entries {
        buffer.pop_front();
    }
    buffer.push_back(item);
}
