//! In-process model runtime: device choice, GGUF weights, tokenizer.

pub mod device;
pub mod loader;
pub mod model;
pub mod tokenizer;

pub use device::{select_device, CandleProbe, DevicePreference, DeviceProbe, DeviceTier, SelectedDevice};
pub use loader::{GgufLoader, LoadedModel, ModelLoader, ModelSource};
pub use model::{CausalLm, RuntimeModel};
pub use tokenizer::{HfTokenizer, TextCodec};
