//! Command-line arguments for the `llmalfr` binary.

use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

use crate::options::GenerationOptions;

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "llmalfr")]
#[command(about = "Run an instruction over a block of text with a language model", long_about = None)]
#[command(version)]
pub struct CliArgs {
    /// Config file (default: llmalfr.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model name on the server, or weights path with --local
    #[arg(long)]
    pub model: Option<String>,

    /// Ollama API base URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Generate in-process from this GGUF path or owner/repo:file.gguf
    #[arg(long, value_name = "PATH")]
    pub local: Option<String>,

    /// Generation option as KEY=VALUE; VALUE is parsed as JSON when it can be
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub options: Vec<(String, Value)>,

    /// Read the context from a file
    #[arg(long, value_name = "PATH", conflicts_with = "context")]
    pub context_file: Option<PathBuf>,

    /// Instruction applied to the context
    pub prompt: String,

    /// Text to process; read from stdin when neither this nor --context-file is given
    pub context: Option<String>,
}

impl CliArgs {
    /// `-o` values as an option map; a repeated key keeps its last value.
    pub fn option_map(&self) -> GenerationOptions {
        self.options.iter().cloned().collect()
    }
}

/// `key=value`; the value is JSON if it parses, a plain string otherwise.
pub fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("option '{}' is not KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("option '{}' has an empty key", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
