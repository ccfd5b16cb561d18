//! Content-generation client.
//!
//! Submits a prompt to the remote agent and returns its final result. The
//! returned session identifier is what a subscription uses to open the live
//! activity feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SubmitError;

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    message: &'a str,
    agent_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Reply to a submission.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubmitResponse {
    /// Best human-readable rendering of the agent's answer: `response.message`,
    /// then `response.result` (strings verbatim, anything else as JSON).
    pub fn response_text(&self) -> Option<String> {
        let response = self.response.as_ref()?;
        if let Some(message) = response.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
        match response.get("result")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Failure text for an unsuccessful reply.
    pub fn error_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| {
                self.response
                    .as_ref()
                    .and_then(|r| r.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "agent request failed".to_string())
    }
}

/// HTTP client for the content-generation endpoint.
#[derive(Clone, Debug)]
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl AgentClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Submit `prompt` to `agent_id`.
    ///
    /// `session_id` lets the caller pick the session up front so its feed can
    /// be opened before the call returns.
    pub async fn submit(
        &self,
        prompt: &str,
        agent_id: &str,
        session_id: Option<&str>,
    ) -> Result<SubmitResponse, SubmitError> {
        let body = SubmitRequest {
            message: prompt,
            agent_id,
            session_id,
        };
        debug!(endpoint = %self.endpoint, agent_id, "submitting prompt");

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let resp = request.send().await.map_err(SubmitError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmitError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json().await.map_err(SubmitError::from_reqwest)
    }
}
