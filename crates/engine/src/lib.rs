//! Text-generation engine implementations for Parley.
//!
//! All engines implement `parley_core::GenerationEngine`.
//! [`build_engine`] selects one from configuration.

#[cfg(feature = "local")]
pub mod local;
pub mod openai_compat;

#[cfg(feature = "local")]
pub use local::LocalEngine;
pub use openai_compat::OpenAiCompatEngine;

use parley_config::{EngineConfig, EngineKind};
use parley_core::engine::GenerationEngine;
use parley_core::error::GenerationError;
use std::sync::Arc;
use tracing::info;

/// Build the engine described by `config`.
pub fn build_engine(config: &EngineConfig) -> Result<Arc<dyn GenerationEngine>, GenerationError> {
    match config.kind {
        EngineKind::OpenaiCompat => {
            info!(url = %config.base_url, model = %config.model, "Using OpenAI-compatible engine");
            let engine = OpenAiCompatEngine::new(&config.base_url, &config.model)?
                .with_api_key(config.api_key.clone());
            Ok(Arc::new(engine))
        }
        #[cfg(feature = "local")]
        EngineKind::Local => {
            info!(model = %config.local_model, template = ?config.chat_template, "Using local engine");
            Ok(Arc::new(LocalEngine::new(&config.local_model, config.chat_template)))
        }
        #[cfg(not(feature = "local"))]
        EngineKind::Local => Err(GenerationError::Unavailable(
            "the local engine requires building with `--features local`".into(),
        )),
    }
}
