use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::{Backend, GenerationRequest, GenerationResult, RawOutput};
use crate::errors::{ProcessorError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:11434/api";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Whole-request timeout. 0 disables it.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

impl RemoteConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/generate", self.base_url.trim_end_matches('/'))
    }
}

/// Blocking client for an Ollama-compatible `/generate` endpoint.
pub struct RemoteBackend {
    agent: ureq::Agent,
    endpoint: String,
}

impl RemoteBackend {
    pub fn new(config: &RemoteConfig) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if config.connect_timeout_secs > 0 {
            builder = builder.timeout_connect(Duration::from_secs(config.connect_timeout_secs));
        }
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }

        Self {
            agent: builder.build(),
            endpoint: config.endpoint(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Backend for RemoteBackend {
    fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        tracing::debug!(endpoint = %self.endpoint, model = %request.model, "POST generate");

        let envelope: Value = match self.agent.post(&self.endpoint).send_json(request) {
            Ok(response) => {
                let body = read_body(response)?;
                serde_json::from_str(&body)
                    .map_err(|e| ProcessorError::ResponseFormat(format!("body is not JSON: {}", e)))?
            }
            // JSON error envelopes go to extraction like any other body
            Err(ureq::Error::Status(code, response)) => {
                let body = read_body(response)?;
                match serde_json::from_str::<Value>(&body) {
                    Ok(envelope) => {
                        tracing::warn!(status = code, "server answered with an error status");
                        envelope
                    }
                    Err(_) => return Err(ProcessorError::Transport(status_message(code, &body))),
                }
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ProcessorError::Transport(format!(
                    "{} unreachable: {}",
                    self.endpoint, transport
                )));
            }
        };

        if let Ok(stats) = serde_json::from_value::<GenerateStats>(envelope.clone()) {
            tracing::debug!(
                eval_count = stats.eval_count,
                total_duration_ns = stats.total_duration,
                "generate finished"
            );
        }

        Ok(GenerationResult {
            full_prompt: request.prompt.clone(),
            output: RawOutput::Envelope(envelope),
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Timing metadata Ollama attaches to a finished generation.
#[derive(Debug, Deserialize)]
struct GenerateStats {
    eval_count: Option<u64>,
    total_duration: Option<u64>,
}

fn read_body(response: ureq::Response) -> Result<String> {
    response
        .into_string()
        .map_err(|e| ProcessorError::Transport(format!("reading response body failed: {}", e)))
}

/// Message for an error status whose body is not a JSON envelope.
fn status_message(code: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    if detail.is_empty() {
        format!("server answered HTTP {}", code)
    } else {
        format!("server answered HTTP {}: {}", code, detail)
    }
}
