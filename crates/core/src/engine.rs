//! Generation engine traits: the abstraction over text-generation backends.
//!
//! An engine opens a fresh [`EngineSession`] per request. A session accepts a
//! single [`GenerationRequest`] and yields the generated text as a stream of
//! fragments. Sessions are consumed by `generate`, so a fragment stream can be
//! read exactly once and never restarted.
//!
//! Implementations: OpenAI-compatible HTTP servers (llama.cpp, Ollama, vLLM)
//! and an in-process GGUF model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// A single generation request. Built fresh per call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The fully assembled prompt
    pub prompt_text: String,

    /// Sampling temperature (0.0 = greedy)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Whether the engine should deliver fragments as they are produced
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    800
}

fn default_streaming() -> bool {
    true
}

impl GenerationRequest {
    /// Build a request with the default parameters (0.7, 800 tokens, streaming).
    pub fn new(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: default_streaming(),
        }
    }
}

/// Receiving end of a fragment stream.
///
/// Fragments arrive in generation order. The stream is finished when the
/// channel closes; an `Err` item means the engine failed mid-generation.
pub type FragmentStream = tokio::sync::mpsc::Receiver<Result<String, GenerationError>>;

/// A generation backend.
///
/// The engine is created once and injected into the pipeline; every call to
/// [`chat_session`](GenerationEngine::chat_session) starts from a clean state.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// A human-readable name for this engine (e.g., "openai_compat", "local").
    fn name(&self) -> &str;

    /// Open a new, independent generation session.
    async fn chat_session(&self) -> Result<Box<dyn EngineSession>, GenerationError>;

    /// Can we reach the engine?
    async fn health_check(&self) -> Result<bool, GenerationError> {
        Ok(true)
    }
}

/// One generation session. Consumed by [`generate`](EngineSession::generate).
#[async_trait]
pub trait EngineSession: Send {
    /// Submit the prompt and return the stream of generated fragments.
    async fn generate(
        self: Box<Self>,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError>;
}
