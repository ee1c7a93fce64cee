use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

use crate::errors::{ProcessorError, Result};
use crate::prompting::PromptFamily;

/// Text <-> token id conversion used by the local backend.
pub trait TextCodec {
    /// Encode with the model's special tokens (BOS) added.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    /// Decode, dropping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// `tokenizer.json` loaded through the `tokenizers` crate.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path).map_err(|e| {
            ProcessorError::Configuration(format!("tokenizer {} unreadable: {}", path.display(), e))
        })?;
        Ok(Self { inner })
    }

    /// Token ids that end generation for `family`. Missing ids are skipped,
    /// so the result may be empty for exotic exports; generation then ends
    /// on the token budget or a stop sequence.
    pub fn stop_tokens(&self, family: PromptFamily) -> Vec<u32> {
        let candidates: &[&str] = match family {
            PromptFamily::Llama => &["<|eot_id|>", "<|end_of_text|>", "</s>"],
            PromptFamily::Qwen => &["<|im_end|>", "<|endoftext|>", "</s>"],
            PromptFamily::Mistral => &["</s>", "<|end_of_text|>"],
            PromptFamily::Unknown => &["<|end_of_text|>", "</s>", "<|endoftext|>", "<|eot_id|>"],
        };

        let mut ids: Vec<u32> = candidates
            .iter()
            .filter_map(|token| self.inner.token_to_id(token))
            .collect();
        ids.dedup();

        if ids.is_empty() {
            tracing::warn!(?family, "tokenizer defines no known end-of-sequence token");
        }
        ids
    }
}

impl TextCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.inner
            .encode(text, true)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| ProcessorError::Generation(format!("tokenization failed: {}", e)))
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| ProcessorError::Generation(format!("detokenization failed: {}", e)))
    }
}

/// Look for a `tokenizer.json` next to the weights, then in the working
/// directory, then under `models/`.
pub(super) fn resolve_tokenizer_path(model_path: &Path, tokenizer_hint: Option<&Path>) -> Option<PathBuf> {
    if let Some(hint) = tokenizer_hint {
        if hint.exists() {
            return Some(hint.to_path_buf());
        }
        tracing::warn!(hint = %hint.display(), "configured tokenizer not found, searching");
    }

    let parent_dir = if model_path.is_dir() {
        model_path
    } else {
        model_path.parent().unwrap_or(Path::new("."))
    };
    let local_tok_path = parent_dir.join("tokenizer.json");
    if local_tok_path.exists() {
        return Some(local_tok_path);
    }

    let root_tok_path = Path::new("tokenizer.json");
    if root_tok_path.exists() {
        return Some(root_tok_path.to_path_buf());
    }

    let models_tok_path = Path::new("models").join("tokenizer.json");
    if models_tok_path.exists() {
        return Some(models_tok_path);
    }

    None
}
