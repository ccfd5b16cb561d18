use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ReconnectPolicy;
use crate::reducer::LogLimits;

// =============================================================================
// File config (figment-deserialized from defaults / activity.toml / env vars)
// =============================================================================
//
//   activity.toml:   [reconnect]
//                    max_retries = 3
//
//   env var:         AGENT_ACTIVITY_RECONNECT__MAX_RETRIES=3   (double underscore = nesting)

/// Env var prefix for overrides.
pub const ENV_PREFIX: &str = "AGENT_ACTIVITY_";

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "activity.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub feed: FeedFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub log: LogFileConfig,
    #[serde(default)]
    pub agent: AgentFileConfig,
}

/// Live feed endpoint (lives under `[feed]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedFileConfig {
    /// Must contain `{session_id}`
    #[serde(default = "default_url_template")]
    pub url_template: String,
}

impl Default for FeedFileConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
        }
    }
}

/// Backoff knobs (lives under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Snapshot log bounds (lives under `[log]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogFileConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_events")]
    pub max_thinking_events: usize,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_thinking_events: default_max_events(),
        }
    }
}

/// Content-generation endpoint (lives under `[agent]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentFileConfig {
    #[serde(default = "default_agent_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AgentFileConfig {
    fn default() -> Self {
        Self {
            endpoint: default_agent_endpoint(),
            agent_id: None,
            api_key: None,
        }
    }
}

fn default_url_template() -> String {
    "ws://127.0.0.1:8080/events/{session_id}".to_string()
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_factor() -> u32 {
    2
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_events() -> usize {
    200
}
fn default_agent_endpoint() -> String {
    "http://127.0.0.1:8080/chat".to_string()
}

/// Build a figment that layers: defaults → config file → `AGENT_ACTIVITY_*` env vars.
///
/// A missing config file is not an error; the layer is simply empty.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

impl FileConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        load_config(config_path).extract()
    }
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Everything a subscription needs at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivityConfig {
    pub reconnect: ReconnectPolicy,
    pub limits: LogLimits,
}

impl ActivityConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            reconnect: ReconnectPolicy::from_file(&fc.reconnect),
            limits: LogLimits {
                max_events: fc.log.max_events,
                max_thinking_events: fc.log.max_thinking_events,
            },
        }
    }
}

impl ReconnectPolicy {
    pub fn from_file(fc: &ReconnectFileConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(fc.base_delay_ms),
            factor: fc.factor,
            max_delay: Duration::from_millis(fc.max_delay_ms),
            max_retries: fc.max_retries,
        }
    }
}
