//! Logging initialisation via tracing-subscriber.
//!
//! Logs go to stderr; stdout is reserved for generated text.

use tracing_subscriber::EnvFilter;

use crate::errors::{ProcessorError, Result};

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ProcessorError::Configuration(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| ProcessorError::Configuration(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_succeeds_or_already_init() {
        match init("info") {
            Ok(()) => {}
            Err(ProcessorError::Configuration(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
