use crate::backend::{Backend, GenerationRequest, LocalBackend, LocalConfig, RemoteBackend, RemoteConfig};
use crate::config::{BackendKind, ProcessorConfig};
use crate::errors::Result;
use crate::extract::extract;
use crate::options::{resolve, GenerationOptions};
use crate::prompting::assemble;

/// Ollama model used when none is configured.
pub const DEFAULT_MODEL: &str = "hf.co/elyza/Llama-3-ELYZA-JP-8B-GGUF:latest";

#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Remote(RemoteConfig),
    Local(LocalConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Remote(RemoteConfig::default())
    }
}

/// Runs one prompt + context through a single backend.
pub struct Processor {
    model: String,
    backend: Box<dyn Backend>,
}

impl Processor {
    /// `model` is the server-side model name for the remote backend and the
    /// weights path (or hub reference) for the local one. Local model
    /// loading happens here; a missing artifact is a configuration error.
    pub fn new(model: impl Into<String>, config: BackendConfig) -> Result<Self> {
        let model = model.into();
        let backend: Box<dyn Backend> = match config {
            BackendConfig::Remote(remote) => Box::new(RemoteBackend::new(&remote)),
            BackendConfig::Local(local) => Box::new(LocalBackend::new(&model, &local)?),
        };
        Ok(Self::with_backend(model, backend))
    }

    pub fn remote(model: impl Into<String>, config: RemoteConfig) -> Self {
        Self::with_backend(model, Box::new(RemoteBackend::new(&config)))
    }

    pub fn local(path: impl Into<String>, config: LocalConfig) -> Result<Self> {
        Self::new(path, BackendConfig::Local(config))
    }

    /// Every constructor ends here.
    pub fn with_backend(model: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        let model = model.into();
        tracing::info!(%model, backend = backend.name(), "processor ready");
        Self { model, backend }
    }

    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let backend = match config.backend {
            BackendKind::Remote => BackendConfig::Remote(config.remote.clone()),
            BackendKind::Local => BackendConfig::Local(config.local.clone()),
        };
        Self::new(config.model.clone(), backend)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Generate once for `prompt` applied to `context`. `options` override
    /// the default sampling table key by key.
    pub fn process(&mut self, prompt: &str, context: &str, options: &GenerationOptions) -> Result<String> {
        let request = GenerationRequest::new(self.model.clone(), assemble(prompt, context), resolve(options));

        let backend = self.backend.name();
        let result = self.backend.generate(&request).map_err(|e| {
            tracing::warn!(kind = ?e.kind(), backend, "generation failed: {}", e);
            e
        })?;
        extract(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationResult, RawOutput};
    use crate::errors::{ErrorKind, ProcessorError};
    use serde_json::{json, Map};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    /// Records requests and answers with a canned envelope.
    struct CannedBackend {
        envelope: serde_json::Value,
        seen: Rc<RefCell<Vec<GenerationRequest>>>,
    }

    impl Backend for CannedBackend {
        fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
            self.seen.borrow_mut().push(request.clone());
            Ok(GenerationResult {
                full_prompt: request.prompt.clone(),
                output: RawOutput::Envelope(self.envelope.clone()),
            })
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    struct FailingBackend;

    impl Backend for FailingBackend {
        fn generate(&mut self, _request: &GenerationRequest) -> Result<GenerationResult> {
            Err(ProcessorError::Transport("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn canned(envelope: serde_json::Value) -> (Processor, Rc<RefCell<Vec<GenerationRequest>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let backend = CannedBackend {
            envelope,
            seen: Rc::clone(&seen),
        };
        (Processor::with_backend("elyza", Box::new(backend)), seen)
    }

    #[test]
    fn process_returns_response_verbatim() {
        let (mut processor, seen) = canned(json!({"response": "X"}));
        let out = processor.process("要約して", "本文", &Map::new()).expect("process");
        assert_eq!(out, "X");

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prompt, "要約して\n\n本文");
        assert_eq!(seen[0].model, "elyza");
        assert!(!seen[0].stream);
    }

    #[test]
    fn process_merges_call_options() {
        let (mut processor, seen) = canned(json!({"response": ""}));
        let mut options = Map::new();
        options.insert("num_predict".into(), json!(512));
        processor.process("p", "c", &options).expect("process");

        let seen = seen.borrow();
        assert_eq!(seen[0].options["num_predict"], json!(512));
        assert_eq!(seen[0].options["top_k"], json!(40));
    }

    #[test]
    fn missing_response_key_is_an_error_not_empty_text() {
        let (mut processor, _) = canned(json!({"done": true}));
        let err = processor.process("p", "c", &Map::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResponseFormat);
    }

    #[test]
    fn backend_errors_propagate() {
        let mut processor = Processor::with_backend("m", Box::new(FailingBackend));
        let err = processor.process("p", "c", &Map::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn remote_construction_is_lazy() {
        let processor = Processor::new(DEFAULT_MODEL, BackendConfig::default()).expect("remote processor");
        assert_eq!(processor.model(), DEFAULT_MODEL);
        assert_eq!(processor.backend_name(), "remote");
    }

    #[test]
    fn local_construction_fails_on_missing_artifact() {
        let err = Processor::local("/nonexistent/model.gguf", LocalConfig::default())
            .err()
            .expect("missing weights must fail");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_logs(f: impl FnOnce()) -> String {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buf.0.lock().expect("log buffer").clone();
        String::from_utf8(bytes).expect("utf8 logs")
    }

    #[test]
    fn every_constructor_logs_readiness() {
        let logs = captured_logs(|| {
            let _ = Processor::remote("via-remote", RemoteConfig::default());
        });
        assert!(logs.contains("processor ready"), "{logs}");
        assert!(logs.contains("via-remote"), "{logs}");

        let logs = captured_logs(|| {
            Processor::new("via-new", BackendConfig::default()).expect("remote processor");
        });
        assert!(logs.contains("processor ready"), "{logs}");
        assert!(logs.contains("via-new"), "{logs}");
        assert_eq!(logs.matches("processor ready").count(), 1);
    }
}
