use std::collections::HashMap;
use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use serde::Deserialize;

use super::{Backend, GenerationRequest, GenerationResult, RawOutput};
use crate::engine::{
    select_device, CandleProbe, CausalLm, DevicePreference, DeviceProbe, GgufLoader, ModelLoader,
    SelectedDevice, TextCodec,
};
use crate::errors::{ProcessorError, Result};
use crate::options::SamplingParams;
use crate::prompting::{stop_markers, PromptFamily};

/// Penalties look this many tokens back, like llama.cpp's `repeat_last_n`.
const PENALTY_WINDOW: usize = 64;

/// Extra tokens decoded ahead of a stop string's length, for tokens that
/// carry only part of a character.
const STOP_SLACK: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Explicit `tokenizer.json`; otherwise searched next to the weights.
    pub tokenizer: Option<PathBuf>,
    pub tokenizer_repo: Option<String>,
    pub family: Option<PromptFamily>,
    pub device: DevicePreference,
}

impl LocalConfig {
    fn loader(&self) -> GgufLoader {
        GgufLoader {
            tokenizer: self.tokenizer.clone(),
            tokenizer_repo: self.tokenizer_repo.clone(),
            family: self.family,
        }
    }
}

/// Samples from a model owned by this process. The device is chosen once,
/// here, and reused for every call.
pub struct LocalBackend {
    model: Box<dyn CausalLm>,
    codec: Box<dyn TextCodec>,
    stop_tokens: Vec<u32>,
    family: PromptFamily,
    device: SelectedDevice,
}

impl LocalBackend {
    pub fn new(source: &str, config: &LocalConfig) -> Result<Self> {
        Self::with_collaborators(source, config.device, &config.loader(), &CandleProbe)
    }

    pub fn with_collaborators(
        source: &str,
        preference: DevicePreference,
        loader: &dyn ModelLoader,
        probe: &dyn DeviceProbe,
    ) -> Result<Self> {
        let device = select_device(preference, probe);
        let loaded = loader.load(source, &device)?;

        Ok(Self {
            model: loaded.model,
            codec: loaded.codec,
            stop_tokens: loaded.stop_tokens,
            family: loaded.family,
            device,
        })
    }

    pub fn device(&self) -> &SelectedDevice {
        &self.device
    }

    /// Next-token logits for the last position, as a flat vector.
    fn step(&mut self, tokens: &[u32], position: usize) -> Result<Vec<f32>> {
        let input = Tensor::new(tokens, &self.device.device)?.unsqueeze(0)?;
        let mut logits = self.model.forward(&input, position)?;
        while logits.rank() > 1 {
            logits = if logits.dim(0)? == 1 {
                logits.squeeze(0)?
            } else {
                logits.get(logits.dim(0)? - 1)?
            };
        }
        Ok(logits.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    /// First stop string ending in the newest tokens, if any. Earlier
    /// tokens were already checked, so only a tail as long as the longest
    /// stop string is decoded.
    fn stop_hit(&self, generated: &[u32], stops: &[String]) -> Result<Option<String>> {
        let markers = stop_markers(self.family);
        let longest = stops
            .iter()
            .map(String::len)
            .chain(markers.iter().map(|m| m.len()))
            .max();
        let Some(longest) = longest else {
            return Ok(None);
        };

        let tail = &generated[generated.len().saturating_sub(longest + STOP_SLACK)..];
        let text = self.codec.decode(tail)?;
        let hit = stops
            .iter()
            .map(String::as_str)
            .chain(markers.iter().copied())
            .find(|stop| text.contains(stop));
        Ok(hit.map(str::to_string))
    }
}

impl Backend for LocalBackend {
    fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        let params = SamplingParams::from_options(&request.options);
        for key in &params.ignored {
            tracing::warn!(option = %key, "option has no effect on the local backend");
        }

        let prompt_tokens = self.codec.encode(&request.prompt)?;
        if prompt_tokens.is_empty() {
            return Err(ProcessorError::Generation(
                "prompt produced no tokens".to_string(),
            ));
        }
        let budget = token_budget(params.max_new_tokens, prompt_tokens.len(), self.model.context_length())?;
        tracing::debug!(
            prompt_tokens = prompt_tokens.len(),
            max_new_tokens = ?params.max_new_tokens,
            budget,
            tier = %self.device.tier,
            "local generation"
        );

        let mut logits_processor = LogitsProcessor::from_sampling(seed_for(&params), sampling_for(&params));
        let mut generated: Vec<u32> = Vec::new();
        let mut position = 0;
        let mut stopped_on: Option<String> = None;

        for _ in 0..budget {
            let chunk: &[u32] = match generated.last() {
                None => prompt_tokens.as_slice(),
                Some(last) => std::slice::from_ref(last),
            };
            let chunk_len = chunk.len();
            let mut logits = self.step(chunk, position)?;
            position += chunk_len;

            apply_penalties(&mut logits, &prompt_tokens, &generated, &params);
            let logits = Tensor::new(logits.as_slice(), &Device::Cpu)?;
            let next_token = logits_processor.sample(&logits)?;

            if self.stop_tokens.contains(&next_token) {
                break;
            }
            generated.push(next_token);

            if let Some(stop) = self.stop_hit(&generated, &params.stop)? {
                stopped_on = Some(stop);
                break;
            }
        }
        tracing::debug!(generated_tokens = generated.len(), ?stopped_on, "local generation finished");

        let mut all_tokens = prompt_tokens;
        all_tokens.extend_from_slice(&generated);
        let mut decoded = self.codec.decode(&all_tokens)?;
        if let Some(stop) = stopped_on {
            cut_at_stop(&mut decoded, request.prompt.chars().count(), &stop);
        }

        Ok(GenerationResult {
            full_prompt: request.prompt.clone(),
            output: RawOutput::Decoded(decoded),
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// New tokens allowed for this call: the requested count (unbounded when
/// `None`), capped to what is left of the model's context window.
fn token_budget(requested: Option<usize>, prompt_len: usize, window: Option<usize>) -> Result<usize> {
    let Some(window) = window else {
        return Ok(requested.unwrap_or(usize::MAX));
    };
    if prompt_len >= window {
        return Err(ProcessorError::Generation(format!(
            "prompt is {} tokens but the model context holds {}; shorten the context",
            prompt_len, window
        )));
    }

    let room = window - prompt_len;
    match requested {
        Some(n) if n <= room => Ok(n),
        Some(n) => {
            tracing::warn!(requested = n, room, "num_predict exceeds the context window, capping");
            Ok(room)
        }
        None => Ok(room),
    }
}

fn sampling_for(params: &SamplingParams) -> Sampling {
    if params.temperature <= 0.0 {
        return Sampling::ArgMax;
    }
    let temperature = params.temperature;
    let nucleus = params.top_p > 0.0 && params.top_p < 1.0;
    match (params.top_k, nucleus) {
        (0, false) => Sampling::All { temperature },
        (0, true) => Sampling::TopP { p: params.top_p, temperature },
        (k, false) => Sampling::TopK { k, temperature },
        (k, true) => Sampling::TopKThenTopP { k, p: params.top_p, temperature },
    }
}

fn seed_for(params: &SamplingParams) -> u64 {
    if let Some(seed) = params.seed {
        return seed;
    }
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(e) => {
            tracing::warn!("getrandom failed ({}), seeding from the clock", e);
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(299_792_458)
        }
    }
}

/// Repeat, presence and frequency penalties over the last
/// [`PENALTY_WINDOW`] tokens of prompt + output. Ids outside the
/// vocabulary are skipped.
fn apply_penalties(logits: &mut [f32], prompt: &[u32], generated: &[u32], params: &SamplingParams) {
    let no_repeat = params.repeat_penalty == 1.0 || params.repeat_penalty <= 0.0;
    if no_repeat && params.presence_penalty == 0.0 && params.frequency_penalty == 0.0 {
        return;
    }

    let total = prompt.len() + generated.len();
    let skip = total.saturating_sub(PENALTY_WINDOW);
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &token in prompt.iter().chain(generated.iter()).skip(skip) {
        *counts.entry(token).or_insert(0) += 1;
    }

    for (token, count) in counts {
        let Some(logit) = logits.get_mut(token as usize) else {
            continue;
        };
        if !no_repeat {
            if *logit >= 0.0 {
                *logit /= params.repeat_penalty;
            } else {
                *logit *= params.repeat_penalty;
            }
        }
        *logit -= params.presence_penalty + params.frequency_penalty * count as f32;
    }
}

/// Drop everything from the first `stop` after the prompt onwards.
fn cut_at_stop(decoded: &mut String, prompt_chars: usize, stop: &str) {
    let start = decoded
        .char_indices()
        .nth(prompt_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(decoded.len());
    if let Some(offset) = decoded[start..].find(stop) {
        decoded.truncate(start + offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{default_options, resolve};
    use serde_json::json;

    fn params() -> SamplingParams {
        SamplingParams::from_options(&default_options())
    }

    #[test]
    fn sampling_mode_follows_options() {
        assert!(matches!(
            sampling_for(&params()),
            Sampling::TopKThenTopP { k: 40, .. }
        ));

        let mut overrides = serde_json::Map::new();
        overrides.insert("temperature".into(), json!(0));
        assert!(matches!(
            sampling_for(&SamplingParams::from_options(&resolve(&overrides))),
            Sampling::ArgMax
        ));

        overrides.insert("temperature".into(), json!(0.8));
        overrides.insert("top_k".into(), json!(0));
        overrides.insert("top_p".into(), json!(1.0));
        assert!(matches!(
            sampling_for(&SamplingParams::from_options(&resolve(&overrides))),
            Sampling::All { .. }
        ));
    }

    #[test]
    fn budget_follows_request_and_window() {
        assert_eq!(token_budget(Some(2048), 10, None).expect("budget"), 2048);
        assert_eq!(token_budget(None, 10, None).expect("budget"), usize::MAX);
        assert_eq!(token_budget(Some(2048), 10, Some(4096)).expect("budget"), 2048);
        assert_eq!(token_budget(Some(2048), 4000, Some(4096)).expect("budget"), 96);
        assert_eq!(token_budget(None, 4000, Some(4096)).expect("budget"), 96);
        assert_eq!(token_budget(Some(0), 4000, Some(4096)).expect("budget"), 0);
    }

    #[test]
    fn prompt_filling_the_window_is_a_generation_error() {
        let err = token_budget(Some(10), 4096, Some(4096)).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Generation);
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn fixed_seed_is_used_verbatim() {
        assert_eq!(seed_for(&params()), 0);
    }

    #[test]
    fn penalties_hit_seen_tokens_only() {
        let mut logits = vec![2.0, -2.0, 2.0, 2.0];
        apply_penalties(&mut logits, &[0, 1], &[0, 99], &params());

        // token 0 seen twice: 2.0 / 1.2 - 0.2 - 0.4
        assert!((logits[0] - (2.0 / 1.2 - 0.6)).abs() < 1e-5);
        // token 1 seen once, negative logit is multiplied
        assert!((logits[1] - (-2.0 * 1.2 - 0.4)).abs() < 1e-5);
        assert_eq!(logits[2], 2.0);
        assert_eq!(logits[3], 2.0);
    }

    #[test]
    fn penalties_respect_window() {
        let mut logits = vec![1.0, 1.0];
        let prompt: Vec<u32> = std::iter::once(0).chain(std::iter::repeat(5).take(PENALTY_WINDOW)).collect();
        apply_penalties(&mut logits, &prompt, &[], &params());
        assert_eq!(logits, vec![1.0, 1.0]);
    }

    #[test]
    fn cut_at_stop_ignores_the_prompt() {
        let mut decoded = "指示\n\n本文答え。\n余分".to_string();
        cut_at_stop(&mut decoded, "指示\n\n本文".chars().count(), "。\n");
        assert_eq!(decoded, "指示\n\n本文答え");

        let mut decoded = "p\n\ncanswer\n\nmore".to_string();
        cut_at_stop(&mut decoded, 4, "\n\n");
        assert_eq!(decoded, "p\n\ncanswer");
    }

    #[test]
    fn cut_at_stop_survives_short_output() {
        let mut decoded = "abc".to_string();
        cut_at_stop(&mut decoded, 10, "\n\n");
        assert_eq!(decoded, "abc");
    }
}
