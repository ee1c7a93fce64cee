//! Run an instruction over a block of text with a language model, either
//! through an Ollama-compatible server or a GGUF model loaded in-process.
//!
//! ```no_run
//! use llmalfr::{Processor, RemoteConfig};
//!
//! let mut processor = Processor::remote("llama3", RemoteConfig::default());
//! let summary = processor.process("Summarise:", "some long text", &Default::default())?;
//! # Ok::<(), llmalfr::ProcessorError>(())
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod logging;
pub mod options;
pub mod processor;
pub mod prompting;

pub use backend::{Backend, GenerationRequest, GenerationResult, LocalConfig, RawOutput, RemoteConfig};
pub use config::{BackendKind, ProcessorConfig};
pub use errors::{ErrorKind, ProcessorError};
pub use options::{default_options, resolve, GenerationOptions};
pub use processor::{BackendConfig, Processor, DEFAULT_MODEL};
pub use prompting::assemble;
