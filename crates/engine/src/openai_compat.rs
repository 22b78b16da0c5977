//! OpenAI-compatible completion engine.
//!
//! Works with any local server exposing `/v1/completions`: llama.cpp's
//! `llama-server`, Ollama, vLLM, LM Studio, text-generation-webui.
//!
//! The assembled prompt is sent verbatim as a raw completion (no chat
//! messages), and the reply is read back as server-sent events.

use async_trait::async_trait;
use futures::StreamExt;
use parley_core::engine::{EngineSession, FragmentStream, GenerationEngine, GenerationRequest};
use parley_core::error::GenerationError;
use serde::Deserialize;
use tracing::{debug, trace, warn};

/// A generation engine backed by an OpenAI-compatible HTTP server.
///
/// Every session is a separate HTTP request, so no state is shared between
/// generations.
pub struct OpenAiCompatEngine {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatEngine {
    /// Create a new engine pointing at `base_url` (e.g. `http://localhost:8080/v1`).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        // No overall timeout: long generations are bounded by the adapter's deadline.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client,
        })
    }

    /// Create an engine for a local Ollama server (convenience constructor).
    pub fn ollama(model: impl Into<String>) -> Result<Self, GenerationError> {
        Self::new("http://localhost:11434/v1", model)
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn chat_session(&self) -> Result<Box<dyn EngineSession>, GenerationError> {
        Ok(Box::new(OpenAiCompatSession {
            url: format!("{}/completions", self.base_url),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            client: self.client.clone(),
        }))
    }

    async fn health_check(&self) -> Result<bool, GenerationError> {
        let url = format!("{}/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        match req.send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => Err(GenerationError::Unavailable(e.to_string())),
        }
    }
}

/// One completion request against the server.
struct OpenAiCompatSession {
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[async_trait]
impl EngineSession for OpenAiCompatSession {
    async fn generate(
        self: Box<Self>,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt_text,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": request.streaming,
        });

        debug!(
            model = %self.model,
            streaming = request.streaming,
            prompt_len = request.prompt_text.len(),
            "Sending completion request"
        );

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if request.streaming {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 404 {
            return Err(GenerationError::ModelNotFound(format!(
                "{} (server returned 404 for {})",
                self.model, self.url
            )));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Engine returned error");
            return Err(GenerationError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        if !request.streaming {
            let completion: CompletionResponse =
                response.json().await.map_err(|e| GenerationError::Api {
                    status_code: 200,
                    message: format!("Failed to parse response: {e}"),
                })?;
            if let Some(error) = completion.error {
                return Err(GenerationError::Api {
                    status_code: 200,
                    message: error_message(&error),
                });
            }
            let text = completion
                .choices
                .into_iter()
                .next()
                .map(|c| c.text)
                .unwrap_or_default();
            // Capacity 64, a single send cannot block.
            let _ = tx.try_send(Ok(text));
            return Ok(rx);
        }

        // Spawn task to read the SSE byte stream and forward text fragments
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GenerationError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        Some(SseEvent::Text(text)) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Some(SseEvent::Done) => return,
                        Some(SseEvent::Error(message)) => {
                            warn!(error = %message, "Engine reported an error mid-stream");
                            let _ = tx
                                .send(Err(GenerationError::StreamInterrupted(message)))
                                .await;
                            return;
                        }
                        None => trace!(line = %line, "Ignoring SSE line"),
                    }
                }
            }
            // Stream ended without [DONE]: dropping tx closes the channel.
        });

        Ok(rx)
    }
}

/// Splits an incoming byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte UTF-8
/// characters split across network chunks decode correctly.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
        }
        lines
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Text(String),
    Error(String),
    Done,
}

/// Interpret one SSE line. Comments, blank lines, empty deltas and
/// unparseable payloads yield `None`. A payload carrying an `error`
/// member ends the stream with that error.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let chunk: CompletionResponse = serde_json::from_str(data).ok()?;
    if let Some(error) = chunk.error {
        return Some(SseEvent::Error(error_message(&error)));
    }
    let text = chunk.choices.into_iter().next()?.text;
    if text.is_empty() {
        None
    } else {
        Some(SseEvent::Text(text))
    }
}

/// llama.cpp and vLLM send `{"error": {"message": ...}}`; some servers send
/// a bare string.
fn error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

// --- Completions API types (internal) ---

/// Both the full response and each streamed chunk share this shape.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    async fn drain(mut rx: FragmentStream) -> Result<Vec<String>, GenerationError> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item?);
        }
        Ok(out)
    }

    #[test]
    fn ollama_constructor() {
        let engine = OpenAiCompatEngine::ollama("llama3.2:3b").unwrap();
        assert_eq!(engine.base_url, "http://localhost:11434/v1");
        assert_eq!(engine.model(), "llama3.2:3b");
        assert_eq!(engine.name(), "openai_compat");
    }

    #[test]
    fn trailing_slash_trimmed_and_empty_key_ignored() {
        let engine = OpenAiCompatEngine::new("http://host:8080/v1/", "m")
            .unwrap()
            .with_api_key(Some(String::new()));
        assert_eq!(engine.base_url, "http://host:8080/v1");
        assert!(engine.api_key.is_none());
    }

    #[test]
    fn parse_text_chunk() {
        let line = r#"data: {"id":"cmpl-1","choices":[{"text":"Hel","index":0,"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(line), Some(SseEvent::Text("Hel".into())));
    }

    #[test]
    fn parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"text":"","finish_reason":"stop"}]}"#),
            None
        );
    }

    #[test]
    fn parse_error_event() {
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"CUDA out of memory","code":500}}"#),
            Some(SseEvent::Error("CUDA out of memory".into()))
        );
        assert_eq!(
            parse_sse_line(r#"data: {"error":"model crashed"}"#),
            Some(SseEvent::Error("model crashed".into()))
        );
    }

    #[test]
    fn line_buffer_handles_split_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: one").is_empty());
        assert_eq!(buf.push(b"\r\ndata: two\n"), vec!["data: one", "data: two"]);

        // "é" is two bytes; split it across pushes
        let bytes = "data: caf\u{e9}\n".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 2);
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["data: caf\u{e9}"]);
    }

    #[tokio::test]
    async fn streams_fragments_in_order() {
        let sse = concat!(
            "data: {\"choices\":[{\"text\":\"Paris\"}]}\n\n",
            ": comment\n",
            "data: {\"choices\":[{\"text\":\".\"}]}\n\n",
            "data: {\"choices\":[{\"text\":\" User: thanks\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let router = Router::new().route(
            "/v1/completions",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], sse) }),
        );
        let base = serve(router).await;

        let engine = OpenAiCompatEngine::new(base, "test-model").unwrap();
        let session = engine.chat_session().await.unwrap();
        let rx = session.generate(GenerationRequest::new("prompt")).await.unwrap();

        let fragments = drain(rx).await.unwrap();
        assert_eq!(fragments, vec!["Paris", ".", " User: thanks"]);
    }

    #[tokio::test]
    async fn error_event_mid_stream_interrupts() {
        let sse = concat!(
            "data: {\"choices\":[{\"text\":\"half an ans\"}]}\n\n",
            "data: {\"error\":{\"message\":\"CUDA out of memory\",\"code\":500}}\n\n",
            "data: [DONE]\n\n",
        );
        let router = Router::new().route(
            "/v1/completions",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], sse) }),
        );
        let base = serve(router).await;

        let engine = OpenAiCompatEngine::new(base, "test-model").unwrap();
        let mut rx = engine
            .chat_session()
            .await
            .unwrap()
            .generate(GenerationRequest::new("prompt"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), "half an ans");
        match rx.recv().await {
            Some(Err(GenerationError::StreamInterrupted(message))) => {
                assert_eq!(message, "CUDA out of memory");
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn sends_request_parameters() {
        let router = Router::new().route(
            "/v1/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "choices": [{ "text": body.to_string() }]
                }))
            }),
        );
        let base = serve(router).await;

        let engine = OpenAiCompatEngine::new(base, "echo").unwrap();
        let mut request = GenerationRequest::new("Hello");
        request.streaming = false;
        let rx = engine.chat_session().await.unwrap().generate(request).await.unwrap();

        let fragments = drain(rx).await.unwrap();
        assert_eq!(fragments.len(), 1);
        let echoed: serde_json::Value = serde_json::from_str(&fragments[0]).unwrap();
        assert_eq!(echoed["model"], "echo");
        assert_eq!(echoed["prompt"], "Hello");
        assert_eq!(echoed["max_tokens"], 800);
        assert_eq!(echoed["stream"], false);
        assert!((echoed["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn not_found_maps_to_model_not_found() {
        let router = Router::new().route(
            "/v1/completions",
            post(|| async { StatusCode::NOT_FOUND.into_response() }),
        );
        let base = serve(router).await;

        let engine = OpenAiCompatEngine::new(base, "missing").unwrap();
        let err = engine
            .chat_session()
            .await
            .unwrap()
            .generate(GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let router = Router::new().route(
            "/v1/completions",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading model").into_response() }),
        );
        let base = serve(router).await;

        let engine = OpenAiCompatEngine::new(base, "m").unwrap();
        let err = engine
            .chat_session()
            .await
            .unwrap()
            .generate(GenerationRequest::new("x"))
            .await
            .unwrap_err();
        match err {
            GenerationError::Api { status_code, message } => {
                assert_eq!(status_code, 503);
                assert_eq!(message, "loading model");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // Reserve a port, then release it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = OpenAiCompatEngine::new(format!("http://{addr}/v1"), "m").unwrap();
        let err = engine
            .chat_session()
            .await
            .unwrap()
            .generate(GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }
}
