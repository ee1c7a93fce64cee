//! Generation backends.
//!
//! A processor holds exactly one backend, chosen at construction. The remote
//! backend talks HTTP to an Ollama-compatible server; the local backend
//! samples from a model loaded in this process.

pub mod local;
pub mod remote;

use serde::Serialize;

use crate::errors::Result;
use crate::options::GenerationOptions;

pub use local::{LocalBackend, LocalConfig};
pub use remote::{RemoteBackend, RemoteConfig};

/// One fully assembled request. Serialises to the remote wire body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            options,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// Parsed JSON body returned by the server.
    Envelope(serde_json::Value),
    /// Decoded prompt tokens followed by the generated tokens.
    Decoded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub full_prompt: String,
    pub output: RawOutput,
}

pub trait Backend {
    fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}
