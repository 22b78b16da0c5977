//! Local inference engine: runs a GGUF model directly on this machine.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) to
//! run quantized Llama-family models with no server, no network and no API
//! key. The default model is `Llama-3.2-3B-Instruct-Q4_0.gguf`.
//!
//! # Example
//! ```toml
//! [engine]
//! kind = "local"
//! local_model = "/models/Llama-3.2-3B-Instruct-Q4_0.gguf"
//! chat_template = "llama3"
//! ```

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use parley_config::ChatTemplate;
use parley_core::engine::{EngineSession, FragmentStream, GenerationEngine, GenerationRequest};
use parley_core::error::GenerationError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

// ── Well-known model files ─────────────────────────────────────────────

/// A GGUF file name that can be fetched from the HuggingFace Hub when it is
/// not present on disk.
struct ModelPreset {
    file: &'static str,
    repo: &'static str,
    tokenizer_repo: &'static str,
}

fn resolve_preset(file_name: &str) -> Option<ModelPreset> {
    match file_name.to_lowercase().as_str() {
        "llama-3.2-3b-instruct-q4_0.gguf" => Some(ModelPreset {
            file: "Llama-3.2-3B-Instruct-Q4_0.gguf",
            repo: "bartowski/Llama-3.2-3B-Instruct-GGUF",
            tokenizer_repo: "unsloth/Llama-3.2-3B-Instruct",
        }),
        "llama-3.2-1b-instruct-q4_0.gguf" => Some(ModelPreset {
            file: "Llama-3.2-1B-Instruct-Q4_0.gguf",
            repo: "bartowski/Llama-3.2-1B-Instruct-GGUF",
            tokenizer_repo: "unsloth/Llama-3.2-1B-Instruct",
        }),
        _ => None,
    }
}

/// Tokenizer repo used when no `tokenizer.json` sits next to the model.
fn fallback_tokenizer_repo(template: ChatTemplate) -> &'static str {
    match template {
        ChatTemplate::Llama3 => "unsloth/Llama-3.2-3B-Instruct",
        ChatTemplate::Chatml => "Qwen/Qwen2-0.5B-Instruct",
        ChatTemplate::Raw => "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
    }
}

// ── Local Engine ───────────────────────────────────────────────────────

/// An engine that runs a GGUF-quantized model in-process via Candle.
///
/// The model is loaded once, on the first session, and kept for the life of
/// the engine. Sessions take turns on it: Candle inference is CPU-bound and
/// single-threaded, so the weights sit behind a mutex.
pub struct LocalEngine {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model: String,
    chat_template: ChatTemplate,
}

/// The loaded model state (tokenizer + weights).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    stop_tokens: Vec<u32>,
}

impl LocalEngine {
    /// Create a new local engine. `model` is a path to a `.gguf` file or the
    /// file name of a known preset. Loading is deferred to the first request.
    pub fn new(model: impl Into<String>, chat_template: ChatTemplate) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model: model.into(),
            chat_template,
        }
    }

    /// Load the weights now instead of on the first request.
    pub async fn preload(&self) -> Result<(), GenerationError> {
        self.ensure_loaded().await
    }

    async fn ensure_loaded(&self) -> Result<(), GenerationError> {
        let mut state = self.inner.lock().await;
        if state.is_some() {
            return Ok(());
        }

        info!(model = %self.model, "Loading local model on first request...");
        let model = self.model.clone();
        let template = self.chat_template;
        let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&model, template))
            .await
            .map_err(|e| GenerationError::Inference(format!("model loading task failed: {e}")))??;

        *state = Some(loaded);
        Ok(())
    }
}

impl LocalModelState {
    fn load(model: &str, template: ChatTemplate) -> Result<Self, GenerationError> {
        let device = Device::Cpu;
        let (model_path, tokenizer_repo) = Self::locate(model, template)?;

        info!(path = %model_path.display(), "Loading local GGUF model");

        let mut file = std::fs::File::open(&model_path)
            .map_err(|e| GenerationError::Unavailable(format!("failed to open model file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| GenerationError::Unavailable(format!("failed to parse GGUF file: {e}")))?;

        let weights = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| GenerationError::Unavailable(format!("failed to load model weights: {e}")))?;

        let tokenizer = Self::load_tokenizer(&model_path, tokenizer_repo)?;

        let stop_tokens: Vec<u32> = ["</s>", "<|endoftext|>", "<|im_end|>", "<|eot_id|>", "<|end_of_text|>"]
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();

        info!(stop_tokens = ?stop_tokens, "Local model loaded successfully");

        Ok(Self {
            model: weights,
            tokenizer,
            device,
            stop_tokens,
        })
    }

    /// Find the GGUF file on disk, or download a known preset.
    fn locate(model: &str, template: ChatTemplate) -> Result<(PathBuf, &'static str), GenerationError> {
        let path = Path::new(model);
        if path.exists() {
            return Ok((path.to_path_buf(), fallback_tokenizer_repo(template)));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let preset = resolve_preset(&file_name).ok_or_else(|| {
            GenerationError::ModelNotFound(format!(
                "'{model}' does not exist and is not a known model file. \
                 Known: Llama-3.2-3B-Instruct-Q4_0.gguf, Llama-3.2-1B-Instruct-Q4_0.gguf"
            ))
        })?;

        info!(repo = preset.repo, file = preset.file, "Downloading local model");
        let api = Api::new()
            .map_err(|e| GenerationError::Unavailable(format!("HuggingFace Hub API error: {e}")))?;
        let downloaded = api.model(preset.repo.to_string()).get(preset.file).map_err(|e| {
            GenerationError::Unavailable(format!(
                "failed to download '{}' from '{}': {e}",
                preset.file, preset.repo
            ))
        })?;
        Ok((downloaded, preset.tokenizer_repo))
    }

    fn load_tokenizer(model_path: &Path, fallback_repo: &str) -> Result<Tokenizer, GenerationError> {
        let beside = model_path.with_file_name("tokenizer.json");
        let tokenizer_path = if beside.exists() {
            beside
        } else {
            warn!(repo = fallback_repo, "No tokenizer.json next to the model, downloading one");
            let api = Api::new()
                .map_err(|e| GenerationError::Unavailable(format!("HuggingFace Hub API error: {e}")))?;
            api.model(fallback_repo.to_string())
                .get("tokenizer.json")
                .map_err(|e| {
                    GenerationError::Unavailable(format!("failed to download tokenizer: {e}"))
                })?
        };

        Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| GenerationError::Unavailable(format!("failed to load tokenizer: {e}")))
    }

    /// Run one generation, sending decoded text deltas to `tx` as they appear.
    ///
    /// Starts at position 0, which resets the model's KV cache, so nothing
    /// from a previous session leaks into this one.
    fn generate(
        &mut self,
        prompt: &str,
        add_special_tokens: bool,
        max_tokens: u32,
        temperature: f32,
        tx: &mpsc::Sender<Result<String, GenerationError>>,
    ) -> Result<(), GenerationError> {
        let encoding = self
            .tokenizer
            .encode(prompt, add_special_tokens)
            .map_err(|e| GenerationError::Inference(format!("tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids().to_vec();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens,
            temperature,
            "Starting local generation"
        );

        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42);
        let mut sampler = if temperature <= 0.0 {
            LogitsProcessor::new(seed, None, None)
        } else {
            LogitsProcessor::new(seed, Some(f64::from(temperature)), None)
        };

        let mut generated: Vec<u32> = Vec::new();
        let mut emitted = 0usize;
        let mut input = Tensor::new(prompt_tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut position = 0usize;

        for _ in 0..max_tokens {
            let step_len = input.dim(1).map_err(map_candle_err)?;
            let logits = self
                .model
                .forward(&input, position)
                .and_then(|l| l.squeeze(0))
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(map_candle_err)?;
            position += step_len;

            let next = sampler.sample(&logits).map_err(map_candle_err)?;
            if self.stop_tokens.contains(&next) {
                break;
            }
            generated.push(next);

            if let Some(delta) = self.decode_delta(&generated, &mut emitted)? {
                if tx.blocking_send(Ok(delta)).is_err() {
                    debug!("Fragment receiver dropped, stopping generation");
                    return Ok(());
                }
            }

            input = Tensor::new(&[next][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        // Flush whatever the final decode adds (e.g. a held-back partial char)
        let text = self.decode(&generated)?;
        if text.len() > emitted && text.is_char_boundary(emitted) {
            let _ = tx.blocking_send(Ok(text[emitted..].to_string()));
        }

        debug!(completion_tokens = generated.len(), "Generation complete");
        Ok(())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, GenerationError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| GenerationError::Inference(format!("detokenization failed: {e}")))
    }

    /// New text since the last emitted prefix, holding back incomplete UTF-8.
    fn decode_delta(&self, tokens: &[u32], emitted: &mut usize) -> Result<Option<String>, GenerationError> {
        let text = self.decode(tokens)?;
        if text.ends_with('\u{fffd}') || text.len() <= *emitted || !text.is_char_boundary(*emitted) {
            return Ok(None);
        }
        let delta = text[*emitted..].to_string();
        *emitted = text.len();
        Ok(Some(delta))
    }
}

/// Wrap the assembled prompt in the model's chat markup.
fn apply_template(template: ChatTemplate, prompt: &str) -> String {
    match template {
        ChatTemplate::Raw => prompt.to_string(),
        ChatTemplate::Llama3 => format!(
            "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        ),
        ChatTemplate::Chatml => {
            format!("<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant\n")
        }
    }
}

/// Map Candle errors to GenerationError.
fn map_candle_err(e: candle_core::Error) -> GenerationError {
    GenerationError::Inference(format!("candle inference error: {e}"))
}

// ── Engine trait implementation ────────────────────────────────────────

#[async_trait]
impl GenerationEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn chat_session(&self) -> Result<Box<dyn EngineSession>, GenerationError> {
        self.ensure_loaded().await?;
        Ok(Box::new(LocalSession {
            inner: self.inner.clone(),
            chat_template: self.chat_template,
        }))
    }
}

struct LocalSession {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    chat_template: ChatTemplate,
}

#[async_trait]
impl EngineSession for LocalSession {
    async fn generate(
        self: Box<Self>,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let (tx, rx) = mpsc::channel(64);
        let prompt = apply_template(self.chat_template, &request.prompt_text);
        // The Llama 3 markup already carries <|begin_of_text|>.
        let add_special = self.chat_template != ChatTemplate::Llama3;
        let inner = self.inner;

        // Run inference on a blocking thread (Candle is CPU-bound)
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let Some(state) = guard.as_mut() else {
                let _ = tx.blocking_send(Err(GenerationError::Unavailable(
                    "local model is not loaded".into(),
                )));
                return;
            };
            if let Err(e) = state.generate(
                &prompt,
                add_special,
                request.max_tokens,
                request.temperature,
                &tx,
            ) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(rx)
    }
}
