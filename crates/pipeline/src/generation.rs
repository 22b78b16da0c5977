//! Generation adapter: turns an engine's fragment stream into one string.
//!
//! Every call opens a fresh session, so nothing the engine remembers from
//! one request reaches the next. Fragments are concatenated in delivery
//! order. On any failure the text gathered so far is dropped.

use parley_config::GenerationConfig;
use parley_core::engine::{GenerationEngine, GenerationRequest};
use parley_core::error::GenerationError;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sampling parameters applied to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub streaming: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 800,
            streaming: true,
        }
    }
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            streaming: config.streaming,
        }
    }
}

/// Drives one engine session per call and accumulates its output.
#[derive(Clone)]
pub struct Generator {
    engine: Arc<dyn GenerationEngine>,
    params: GenerationParams,
    timeout: Option<Duration>,
}

impl Generator {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        Self {
            engine,
            params: GenerationParams::default(),
            timeout: None,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Give up on a generation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Generate a complete reply for `prompt_text`.
    pub async fn generate(&self, prompt_text: &str) -> Result<String, GenerationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(prompt_text))
                .await
                .map_err(|_| GenerationError::Timeout {
                    timeout_secs: limit.as_secs(),
                })?,
            None => self.run(prompt_text).await,
        }
    }

    async fn run(&self, prompt_text: &str) -> Result<String, GenerationError> {
        let session = self.engine.chat_session().await?;
        let request = GenerationRequest {
            prompt_text: prompt_text.to_string(),
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            streaming: self.params.streaming,
        };

        let mut fragments = session.generate(request).await?;
        let mut text = String::new();
        let mut count = 0usize;
        while let Some(fragment) = fragments.recv().await {
            text.push_str(&fragment?);
            count += 1;
        }

        debug!(
            engine = self.engine.name(),
            fragments = count,
            chars = text.chars().count(),
            "Generation stream drained"
        );
        Ok(text)
    }
}
