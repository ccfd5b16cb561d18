//! Activity Events
//!
//! The closed set of typed events carried by a live feed, and the envelope
//! decoder that turns raw feed messages into them.
//!
//! Decoding never fails: anything that is not a recognizable JSON envelope
//! becomes [`ActivityEvent::Unknown`] so that new event shapes from the remote
//! agent never break the stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A single event observed on a live feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// The feed is open
    ConnectionOpened,

    /// The feed closed (caller teardown or reconnection gave up)
    ConnectionClosed,

    /// An agent began processing
    AgentStarted { agent_id: String, agent_name: String },

    /// An agent stopped processing
    AgentFinished { agent_id: String },

    /// Incremental reasoning output
    ThinkingFragment(ThinkingFragment),

    /// Anything that failed to decode; kept for diagnostics only
    Unknown { raw: String },
}

/// A piece of intermediate "thinking" output from an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingFragment {
    pub agent_id: String,
    pub text: String,
    /// Per-agent ordering key; later fragments carry larger values
    pub sequence: u64,
}

impl ActivityEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ActivityEvent::ConnectionOpened => "connection_opened",
            ActivityEvent::ConnectionClosed => "connection_closed",
            ActivityEvent::AgentStarted { .. } => "agent_started",
            ActivityEvent::AgentFinished { .. } => "agent_finished",
            ActivityEvent::ThinkingFragment(_) => "thinking",
            ActivityEvent::Unknown { .. } => "unknown",
        }
    }

    /// The agent this event refers to, if any.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            ActivityEvent::AgentStarted { agent_id, .. }
            | ActivityEvent::AgentFinished { agent_id } => Some(agent_id),
            ActivityEvent::ThinkingFragment(fragment) => Some(&fragment.agent_id),
            _ => None,
        }
    }
}

const AGENT_ID_KEYS: &[&str] = &["agent_id", "agentId"];
const AGENT_NAME_KEYS: &[&str] = &["agent_name", "agentName"];
const TEXT_KEYS: &[&str] = &["text", "message", "content"];
const SEQUENCE_KEYS: &[&str] = &["sequence", "seq"];

/// Decode one raw feed message.
///
/// Pure and total: the same input always yields the same variant, and
/// malformed input maps to [`ActivityEvent::Unknown`]. Fields that fail type
/// coercion fall back to `0` or an empty string instead of rejecting the
/// whole message.
pub fn decode(raw: &str) -> ActivityEvent {
    let unknown = || ActivityEvent::Unknown {
        raw: raw.to_string(),
    };

    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) else {
        debug!(len = raw.len(), "feed message is not a JSON object");
        return unknown();
    };

    let Some(kind) = fields.get("type").and_then(Value::as_str) else {
        debug!("feed message has no type discriminator");
        return unknown();
    };

    match normalize_kind(kind).as_str() {
        "connection_opened" | "connected" => ActivityEvent::ConnectionOpened,
        "connection_closed" | "disconnected" => ActivityEvent::ConnectionClosed,
        "agent_started" | "agent_start" => ActivityEvent::AgentStarted {
            agent_id: string_field(&fields, AGENT_ID_KEYS),
            agent_name: string_field(&fields, AGENT_NAME_KEYS),
        },
        "agent_finished" | "agent_end" | "agent_completed" => ActivityEvent::AgentFinished {
            agent_id: string_field(&fields, AGENT_ID_KEYS),
        },
        "thinking" | "thinking_fragment" => ActivityEvent::ThinkingFragment(ThinkingFragment {
            agent_id: string_field(&fields, AGENT_ID_KEYS),
            text: string_field(&fields, TEXT_KEYS),
            sequence: sequence_field(&fields, SEQUENCE_KEYS),
        }),
        other => {
            debug!(kind = other, "unrecognized feed event type");
            unknown()
        }
    }
}

fn normalize_kind(kind: &str) -> String {
    kind.trim().to_ascii_lowercase().replace('-', "_")
}

fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| fields.get(*key).filter(|v| !v.is_null()))
}

fn string_field(fields: &Map<String, Value>, keys: &[&str]) -> String {
    match first_present(fields, keys) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn sequence_field(fields: &Map<String, Value>, keys: &[&str]) -> u64 {
    match first_present(fields, keys) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
