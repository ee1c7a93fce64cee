//! Configuration loading with env-var overrides.
//!
//! Reads an optional TOML file, then applies `LLMALFR_MODEL`,
//! `LLMALFR_API_URL`, `LLMALFR_BACKEND` and `LLMALFR_LOG_LEVEL`.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::backend::{LocalConfig, RemoteConfig};
use crate::errors::{ProcessorError, Result};
use crate::options::GenerationOptions;
use crate::processor::DEFAULT_MODEL;

pub const DEFAULT_CONFIG_FILE: &str = "llmalfr.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Remote,
    Local,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "ollama" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown backend '{}': expected remote or local", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Server model name (remote) or weights path / hub reference (local).
    pub model: String,
    pub backend: BackendKind,
    pub log_level: String,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    /// Deployment-wide option overrides, applied beneath per-call options.
    pub options: GenerationOptions,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            backend: BackendKind::Remote,
            log_level: "info".to_string(),
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
            options: GenerationOptions::new(),
        }
    }
}

/// Values that win over the file, normally sourced from the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub backend: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    pub fn from_env() -> Self {
        Self {
            model: env::var("LLMALFR_MODEL").ok(),
            api_url: env::var("LLMALFR_API_URL").ok(),
            backend: env::var("LLMALFR_BACKEND").ok(),
            log_level: env::var("LLMALFR_LOG_LEVEL").ok(),
        }
    }

    pub fn apply(&self, config: &mut ProcessorConfig) -> Result<()> {
        if let Some(model) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            config.model = model.to_string();
        }
        if let Some(url) = self.api_url.as_deref().filter(|u| !u.trim().is_empty()) {
            config.remote.base_url = url.to_string();
        }
        if let Some(backend) = &self.backend {
            config.backend = backend.parse().map_err(ProcessorError::Configuration)?;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(())
    }
}

pub fn parse(text: &str) -> Result<ProcessorConfig> {
    toml::from_str(text).map_err(|e| ProcessorError::Configuration(format!("invalid config: {}", e)))
}

/// Load `path` (or `llmalfr.toml` when present) plus environment overrides.
/// An explicit path that cannot be read is an error; a missing default file
/// is not.
pub fn load(path: Option<&Path>) -> Result<ProcessorConfig> {
    load_from(path, &ConfigOverrides::from_env())
}

pub fn load_from(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<ProcessorConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                ProcessorError::Configuration(format!("cannot read {}: {}", path.display(), e))
            })?;
            parse(&text)?
        }
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                let text = fs::read_to_string(default_path).map_err(|e| {
                    ProcessorError::Configuration(format!("cannot read {}: {}", DEFAULT_CONFIG_FILE, e))
                })?;
                parse(&text)?
            } else {
                ProcessorConfig::default()
            }
        }
    };

    overrides.apply(&mut config)?;
    tracing::debug!(model = %config.model, backend = ?config.backend, "configuration loaded");
    Ok(config)
}
