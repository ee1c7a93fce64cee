use anyhow::{Error as E, Result};
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_llama;
use candle_transformers::models::quantized_qwen2;

use crate::prompting::PromptFamily;

/// Used when the GGUF header does not record a context length.
const FALLBACK_CONTEXT: usize = 4096;

/// A causal language model that can be stepped one chunk of tokens at a
/// time. `position` is the index of the first token of `input` in the
/// running sequence; passing 0 starts a fresh sequence and drops any cached
/// attention state.
pub trait CausalLm {
    /// Logits for the last position of `input` (`[1, seq]` token ids).
    /// Implementations may return `[vocab]` or `[1, vocab]`.
    fn forward(&mut self, input: &Tensor, position: usize) -> candle_core::Result<Tensor>;

    /// Longest sequence, prompt plus output, the model can attend over.
    fn context_length(&self) -> Option<usize> {
        None
    }
}

enum Weights {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

pub struct RuntimeModel {
    weights: Weights,
    context_length: usize,
}

impl RuntimeModel {
    /// Load GGUF weights. The architecture recorded in the file wins over
    /// the family guessed from the file name.
    pub fn load_from_gguf(path: &std::path::Path, family: PromptFamily, device: &Device) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| E::msg(format!("Failed to open model file {}: {}", path.display(), e)))?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| E::msg(format!("Not a readable GGUF file {}: {}", path.display(), e)))?;

        let architecture = content
            .metadata
            .get("general.architecture")
            .and_then(|v| v.to_string().ok())
            .cloned();

        let use_qwen = match architecture.as_deref() {
            Some("qwen2") => true,
            Some("llama") | Some("mistral") => false,
            Some(other) => {
                return Err(E::msg(format!(
                    "Unsupported GGUF architecture '{}'. Supported: llama, mistral, qwen2",
                    other
                )))
            }
            None => family == PromptFamily::Qwen,
        };

        let recorded = architecture
            .as_deref()
            .and_then(|arch| content.metadata.get(&format!("{}.context_length", arch)))
            .and_then(|v| {
                v.to_u32()
                    .map(|n| n as usize)
                    .or_else(|_| v.to_u64().map(|n| n as usize))
                    .ok()
            });
        tracing::debug!(?architecture, ?family, ?recorded, "gguf header read");

        if use_qwen {
            let context_length = recorded.unwrap_or(FALLBACK_CONTEXT);
            match quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device) {
                Ok(model) => Ok(Self {
                    weights: Weights::Qwen2(model),
                    context_length,
                }),
                Err(e) => {
                    let msg = format!("{}", e);
                    if msg.contains("cannot find tensor info for output_norm.weight") {
                        Err(E::msg(
                            "Qwen load failed: missing 'output_norm.weight'. The GGUF is likely an incomplete split shard. Use a full single-file GGUF, or merge all split parts first.",
                        ))
                    } else {
                        Err(E::msg(msg))
                    }
                }
            }
        } else {
            // candle's llama cache and masks stop at MAX_SEQ_LEN whatever the header says
            let context_length = recorded
                .unwrap_or(quantized_llama::MAX_SEQ_LEN)
                .min(quantized_llama::MAX_SEQ_LEN);
            let model = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)?;
            Ok(Self {
                weights: Weights::Llama(model),
                context_length,
            })
        }
    }
}

impl CausalLm for RuntimeModel {
    fn forward(&mut self, input: &Tensor, position: usize) -> candle_core::Result<Tensor> {
        match &mut self.weights {
            Weights::Llama(model) => model.forward(input, position),
            Weights::Qwen2(model) => model.forward(input, position),
        }
    }

    fn context_length(&self) -> Option<usize> {
        Some(self.context_length)
    }
}
