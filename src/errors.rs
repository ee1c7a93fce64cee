use thiserror::Error;

/// Coarse classification of a [`ProcessorError`], used for logging and by
/// callers that want to branch without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    ResponseFormat,
    Generation,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Missing model artifact, unreadable tokenizer, bad config file.
    /// Raised while constructing a processor, never from `process`.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    ResponseFormat(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

impl ProcessorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ResponseFormat(_) => ErrorKind::ResponseFormat,
            Self::Generation(_) => ErrorKind::Generation,
        }
    }
}

impl From<candle_core::Error> for ProcessorError {
    fn from(err: candle_core::Error) -> Self {
        Self::Generation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
