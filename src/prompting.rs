use serde::Deserialize;

/// Boundary between instruction and content. Also the first default stop
/// sequence, so a model answering in one paragraph stops at the next blank
/// line.
pub const PROMPT_SEPARATOR: &str = "\n\n";

pub fn assemble(prompt: &str, context: &str) -> String {
    let mut full = String::with_capacity(prompt.len() + PROMPT_SEPARATOR.len() + context.len());
    full.push_str(prompt);
    full.push_str(PROMPT_SEPARATOR);
    full.push_str(context);
    full
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFamily {
    Llama,
    Qwen,
    Mistral,
    Unknown,
}

impl PromptFamily {
    pub fn from_model_name(name: &str) -> Self {
        let lowered = name.to_lowercase();
        if lowered.contains("llama") || lowered.contains("elyza") {
            PromptFamily::Llama
        } else if lowered.contains("qwen") {
            PromptFamily::Qwen
        } else if lowered.contains("mistral") || lowered.contains("mixtral") {
            PromptFamily::Mistral
        } else {
            PromptFamily::Unknown
        }
    }
}

/// End-of-turn markers that sometimes survive decoding as plain text when a
/// GGUF export ships an incomplete special-token table.
pub fn stop_markers(family: PromptFamily) -> &'static [&'static str] {
    match family {
        PromptFamily::Llama => &["<|eot_id|>", "<|end_of_text|>"],
        PromptFamily::Qwen => &["<|im_end|>", "<|endoftext|>"],
        PromptFamily::Mistral => &["</s>"],
        PromptFamily::Unknown => &[],
    }
}
