pub mod ndjson;
pub mod ollama;
pub mod traits;

pub use ollama::OllamaProvider;
pub use traits::{ChatMessage, ChatRequest, Fragment, FragmentStream, GenerationError, Provider};

use crate::config::OllamaConfig;
use std::sync::Arc;

/// Factory: create the generation backend from config
pub fn create_provider(config: &OllamaConfig) -> Arc<dyn Provider> {
    Arc::new(OllamaProvider::from_config(config))
}
