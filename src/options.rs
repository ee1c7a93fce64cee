//! Sampling options: the fixed default table and the per-call merge.
//!
//! Keys use the Ollama option names so the merged map can be forwarded to
//! the server unchanged. The local backend reads the same keys through
//! [`SamplingParams`].

use serde_json::{json, Map, Value};

pub type GenerationOptions = Map<String, Value>;

pub const TEMPERATURE: &str = "temperature";
pub const TOP_P: &str = "top_p";
pub const TOP_K: &str = "top_k";
pub const NUM_PREDICT: &str = "num_predict";
pub const REPEAT_PENALTY: &str = "repeat_penalty";
pub const PRESENCE_PENALTY: &str = "presence_penalty";
pub const FREQUENCY_PENALTY: &str = "frequency_penalty";
pub const STOP: &str = "stop";
pub const SEED: &str = "seed";

/// Tuned for Japanese summarisation and transcript clean-up.
pub fn default_options() -> GenerationOptions {
    let mut defaults = Map::new();
    defaults.insert(TEMPERATURE.into(), json!(0.6));
    defaults.insert(TOP_P.into(), json!(0.88));
    defaults.insert(TOP_K.into(), json!(40));
    defaults.insert(NUM_PREDICT.into(), json!(2048));
    defaults.insert(REPEAT_PENALTY.into(), json!(1.2));
    defaults.insert(PRESENCE_PENALTY.into(), json!(0.2));
    defaults.insert(FREQUENCY_PENALTY.into(), json!(0.2));
    defaults.insert(STOP.into(), json!(["\n\n", "。\n"]));
    // -1 asks for a random seed
    defaults.insert(SEED.into(), json!(0));
    defaults
}

/// Overlay `overrides` onto the defaults. Values are not validated.
pub fn resolve(overrides: &GenerationOptions) -> GenerationOptions {
    let mut merged = default_options();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Typed view of a resolved option map for in-process sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    /// `None` for a negative `num_predict`: generate until EOS, a stop
    /// sequence or the model's context window.
    pub max_new_tokens: Option<usize>,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub stop: Vec<String>,
    /// `None` when the caller asked for a random seed.
    pub seed: Option<u64>,
    /// Keys present in the map that in-process sampling has no use for.
    pub ignored: Vec<String>,
}

impl SamplingParams {
    /// Read a resolved map. Values of the wrong type fall back to the
    /// defaults rather than failing the call.
    pub fn from_options(options: &GenerationOptions) -> Self {
        let defaults = default_options();
        let float = |key: &str| {
            options
                .get(key)
                .and_then(Value::as_f64)
                .or_else(|| defaults.get(key).and_then(Value::as_f64))
                .unwrap_or(0.0)
        };
        let int = |key: &str| {
            options
                .get(key)
                .and_then(Value::as_i64)
                .or_else(|| defaults.get(key).and_then(Value::as_i64))
                .unwrap_or(0)
        };

        let stop = match options.get(STOP) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let num_predict = int(NUM_PREDICT);
        let seed = int(SEED);
        let ignored = options
            .keys()
            .filter(|k| !defaults.contains_key(k.as_str()))
            .cloned()
            .collect();

        Self {
            max_new_tokens: (num_predict >= 0).then_some(num_predict as usize),
            temperature: float(TEMPERATURE),
            top_p: float(TOP_P),
            top_k: int(TOP_K).max(0) as usize,
            repeat_penalty: float(REPEAT_PENALTY) as f32,
            presence_penalty: float(PRESENCE_PENALTY) as f32,
            frequency_penalty: float(FREQUENCY_PENALTY) as f32,
            stop,
            seed: (seed >= 0).then_some(seed as u64),
            ignored,
        }
    }
}
