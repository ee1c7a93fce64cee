use std::fs;
use std::path::{Path, PathBuf};

use super::device::SelectedDevice;
use super::model::{CausalLm, RuntimeModel};
use super::tokenizer::{resolve_tokenizer_path, HfTokenizer, TextCodec};
use crate::errors::{ProcessorError, Result};
use crate::prompting::PromptFamily;

/// Everything the local backend needs, owned for the processor's lifetime.
pub struct LoadedModel {
    pub model: Box<dyn CausalLm>,
    pub codec: Box<dyn TextCodec>,
    /// Token ids that end generation.
    pub stop_tokens: Vec<u32>,
    pub family: PromptFamily,
}

/// Produces a ready model for a name or path. Failures are configuration
/// errors: they surface while building a processor, not per call.
pub trait ModelLoader {
    fn load(&self, source: &str, device: &SelectedDevice) -> Result<LoadedModel>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A `.gguf` file on disk.
    File(PathBuf),
    /// `owner/repo:file.gguf` on the Hugging Face hub.
    Hub { repo: String, file: String },
}

impl ModelSource {
    /// A path that exists wins. A directory must contain a `.gguf` file
    /// (searched recursively, first by name).
    pub fn resolve(source: &str) -> Result<Self> {
        let raw = source.trim();
        if raw.is_empty() {
            return Err(ProcessorError::Configuration("empty model path".to_string()));
        }

        let path = PathBuf::from(raw);
        if path.is_file() {
            return Ok(Self::File(path));
        }
        if path.is_dir() {
            let mut found = Vec::new();
            collect_gguf_files(&path, &mut found)?;
            found.sort();
            return found.into_iter().next().map(Self::File).ok_or_else(|| {
                ProcessorError::Configuration(format!(
                    "no .gguf file under model directory {}",
                    path.display()
                ))
            });
        }

        if let Some((repo, file)) = raw.rsplit_once(':') {
            if repo.contains('/') && file.to_lowercase().ends_with(".gguf") {
                return Ok(Self::Hub {
                    repo: repo.to_string(),
                    file: file.to_string(),
                });
            }
        }

        Err(ProcessorError::Configuration(format!(
            "model artifact not found: '{}'. Pass a .gguf path, a directory holding one, or owner/repo:file.gguf",
            raw
        )))
    }
}

/// Loads quantized GGUF weights through candle plus a `tokenizer.json`.
#[derive(Debug, Clone, Default)]
pub struct GgufLoader {
    pub tokenizer: Option<PathBuf>,
    /// Hub repo to fetch `tokenizer.json` from when none is found on disk.
    pub tokenizer_repo: Option<String>,
    /// Overrides the family guessed from the file name.
    pub family: Option<PromptFamily>,
}

impl ModelLoader for GgufLoader {
    fn load(&self, source: &str, device: &SelectedDevice) -> Result<LoadedModel> {
        let source = ModelSource::resolve(source)?;
        let model_path = match &source {
            ModelSource::File(path) => path.clone(),
            ModelSource::Hub { repo, file } => fetch_from_hub(repo, file)?,
        };

        let family = self.family.unwrap_or_else(|| {
            model_path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(PromptFamily::from_model_name)
                .unwrap_or(PromptFamily::Unknown)
        });

        tracing::info!(path = %model_path.display(), ?family, tier = %device.tier, "loading model");
        let model = RuntimeModel::load_from_gguf(&model_path, family, &device.device)
            .map_err(|e| ProcessorError::Configuration(e.to_string()))?;

        let tokenizer_path = match resolve_tokenizer_path(&model_path, self.tokenizer.as_deref()) {
            Some(path) => path,
            None => {
                let repo = self
                    .tokenizer_repo
                    .clone()
                    .or_else(|| match &source {
                        ModelSource::Hub { repo, .. } => Some(repo.clone()),
                        ModelSource::File(_) => None,
                    })
                    .ok_or_else(|| {
                        ProcessorError::Configuration(format!(
                            "tokenizer.json not found for {}",
                            model_path.display()
                        ))
                    })?;
                tracing::info!(%repo, "tokenizer.json not found locally, fetching from hub");
                fetch_from_hub(&repo, "tokenizer.json")?
            }
        };
        tracing::info!(path = %tokenizer_path.display(), "using tokenizer");
        let tokenizer = HfTokenizer::from_file(&tokenizer_path)?;

        let stop_tokens = tokenizer.stop_tokens(family);
        tracing::info!(?stop_tokens, "model and tokenizer ready");

        Ok(LoadedModel {
            model: Box::new(model),
            codec: Box::new(tokenizer),
            stop_tokens,
            family,
        })
    }
}

fn fetch_from_hub(repo: &str, file: &str) -> Result<PathBuf> {
    let api = hf_hub::api::sync::Api::new()
        .map_err(|e| ProcessorError::Configuration(format!("hub client unavailable: {}", e)))?;
    api.model(repo.to_string())
        .get(file)
        .map_err(|e| ProcessorError::Configuration(format!("fetching {}/{} failed: {}", repo, file, e)))
}

fn collect_gguf_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        ProcessorError::Configuration(format!("model directory read failed '{}': {}", dir.display(), e))
    })?;

    for entry in entries {
        let path = entry
            .map_err(|e| {
                ProcessorError::Configuration(format!(
                    "model directory entry read failed '{}': {}",
                    dir.display(),
                    e
                ))
            })?
            .path();

        if path.is_dir() {
            collect_gguf_files(&path, out)?;
            continue;
        }

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if path.is_file() && extension.eq_ignore_ascii_case("gguf") {
            out.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn resolves_file_and_directory() {
        let base = mk_temp_dir("llmalfr_source");
        let nested = base.join("elyza");
        fs::create_dir_all(&nested).expect("create dirs");
        let model = nested.join("Llama-3-ELYZA-JP-8B-q4_k_m.gguf");
        fs::write(&model, b"stub").expect("write stub");

        assert_eq!(
            ModelSource::resolve(model.to_str().expect("utf8 path")).expect("file"),
            ModelSource::File(model.clone())
        );
        assert_eq!(
            ModelSource::resolve(base.to_str().expect("utf8 path")).expect("dir"),
            ModelSource::File(model)
        );

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn directory_without_weights_is_a_configuration_error() {
        let base = mk_temp_dir("llmalfr_source_empty");
        fs::create_dir_all(&base).expect("create dir");

        let err = ModelSource::resolve(base.to_str().expect("utf8 path")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn hub_reference_is_parsed() {
        let source = ModelSource::resolve("elyza/Llama-3-ELYZA-JP-8B-GGUF:Llama-3-ELYZA-JP-8B-q4_k_m.gguf")
            .expect("hub source");
        assert_eq!(
            source,
            ModelSource::Hub {
                repo: "elyza/Llama-3-ELYZA-JP-8B-GGUF".to_string(),
                file: "Llama-3-ELYZA-JP-8B-q4_k_m.gguf".to_string(),
            }
        );
    }

    #[test]
    fn ollama_style_names_are_rejected() {
        let err = ModelSource::resolve("hf.co/elyza/Llama-3-ELYZA-JP-8B-GGUF:latest").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(ModelSource::resolve("   ").is_err());
    }

    #[test]
    fn loader_fails_fast_on_garbage_weights() {
        let base = mk_temp_dir("llmalfr_loader_garbage");
        fs::create_dir_all(&base).expect("create dir");
        let model = base.join("broken.gguf");
        fs::write(&model, b"not a gguf file").expect("write stub");

        let err = GgufLoader::default()
            .load(model.to_str().expect("utf8 path"), &SelectedDevice::cpu())
            .err()
            .expect("garbage weights must not load");
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let _ = fs::remove_dir_all(base);
    }

    fn mk_temp_dir(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time ok")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), ts))
    }
}
