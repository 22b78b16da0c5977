//! The conversation orchestrator: one call per incoming message.
//!
//! Each message moves through a fixed sequence of phases:
//!
//! 1. **Received**: the transcript snapshot is loaded
//! 2. **Selecting**: relevant past turns are picked from the snapshot
//! 3. **Assembling**: the request string is rendered
//! 4. **Generating**: the engine produces raw text
//! 5. **Sanitizing**: hallucinated dialogue is cut off
//! 6. **Persisted**: user and bot turns are appended and saved together
//!
//! A failure while generating ends the message in **Failed** and nothing is
//! saved. Selection always runs over the snapshot taken before the new user
//! turn is appended, so a prompt never counts as its own context.

use crate::generation::{GenerationParams, Generator};
use crate::prompt::PromptAssembler;
use crate::sanitize::sanitize;
use crate::selector::select;
use parley_config::AppConfig;
use parley_core::engine::GenerationEngine;
use parley_core::error::{Error, GenerationError, Result};
use parley_core::store::TranscriptStore;
use parley_core::turn::{Transcript, Turn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default number of past turns offered to the model.
pub const DEFAULT_CONTEXT_LIMIT: usize = 6;

/// Where a message is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Selecting,
    Assembling,
    Generating,
    Sanitizing,
    Persisted,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Received => "received",
            Phase::Selecting => "selecting",
            Phase::Assembling => "assembling",
            Phase::Generating => "generating",
            Phase::Sanitizing => "sanitizing",
            Phase::Persisted => "persisted",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The answer to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// The sanitized bot reply
    pub response: String,

    /// Whether the exchange reached durable storage
    pub persisted: bool,
}

/// Runs the select → assemble → generate → sanitize → persist pipeline.
///
/// Calls are serialized: the transcript is read, extended and written back
/// under one lock, so concurrent messages never overwrite each other.
pub struct Orchestrator {
    store: Arc<dyn TranscriptStore>,
    generator: Generator,
    assembler: PromptAssembler,
    context_limit: usize,
    strict_persistence: bool,
    turn_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn GenerationEngine>, store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            store,
            generator: Generator::new(engine),
            assembler: PromptAssembler::new(),
            context_limit: DEFAULT_CONTEXT_LIMIT,
            strict_persistence: false,
            turn_lock: Mutex::new(()),
        }
    }

    /// Build an orchestrator with every knob taken from `config`.
    pub fn from_config(
        config: &AppConfig,
        engine: Arc<dyn GenerationEngine>,
        store: Arc<dyn TranscriptStore>,
    ) -> Self {
        let generator = Generator::new(engine)
            .with_params(GenerationParams::from(&config.generation))
            .with_timeout(config.generation.timeout_secs.map(Duration::from_secs));

        Self {
            store,
            generator,
            assembler: PromptAssembler::new().with_instruction(config.prompt.instruction.clone()),
            context_limit: config.context.limit,
            strict_persistence: config.persistence.strict,
            turn_lock: Mutex::new(()),
        }
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    pub fn with_assembler(mut self, assembler: PromptAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_generator(mut self, generator: Generator) -> Self {
        self.generator = generator;
        self
    }

    /// Surface save failures as errors instead of returning an unsaved reply.
    pub fn with_strict_persistence(mut self, strict: bool) -> Self {
        self.strict_persistence = strict;
        self
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn engine_name(&self) -> &str {
        self.generator.engine_name()
    }

    /// The stored transcript. An unreadable store reads as empty.
    ///
    /// Reads without waiting for an in-flight turn; saves replace the
    /// transcript whole, so a reader sees either the old or the new one.
    pub async fn history(&self) -> Transcript {
        self.load_snapshot().await
    }

    /// Answer one user message and record the exchange.
    pub async fn handle_message(&self, user_text: &str) -> Result<Reply> {
        if user_text.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let user_turn = Turn::user(user_text)?;

        let _guard = self.turn_lock.lock().await;

        let mut transcript = self.load_snapshot().await;
        trace_phase(Phase::Received, transcript.len());

        let prompt = {
            trace_phase(Phase::Selecting, transcript.len());
            let relevant = select(user_text, transcript.turns(), self.context_limit);
            debug!(selected = relevant.len(), limit = self.context_limit, "Context selected");

            trace_phase(Phase::Assembling, transcript.len());
            self.assembler.assemble(user_text, &relevant)
        };

        trace_phase(Phase::Generating, transcript.len());
        let raw = match self.generator.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(phase = %Phase::Failed, engine = self.generator.engine_name(), error = %e, "Generation failed");
                return Err(e.into());
            }
        };

        trace_phase(Phase::Sanitizing, transcript.len());
        let response = sanitize(&raw);
        if response.is_empty() {
            warn!(phase = %Phase::Failed, raw_len = raw.len(), "Reply was empty after cleanup");
            return Err(GenerationError::EmptyReply.into());
        }
        let bot_turn = Turn::bot(response.as_str())?;

        transcript.push(user_turn);
        transcript.push(bot_turn);

        let persisted = match self.store.save(&transcript).await {
            Ok(()) => true,
            Err(e) if self.strict_persistence => {
                error!(store = self.store.name(), error = %e, "Failed to save transcript");
                return Err(e.into());
            }
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Reply returned but not saved");
                false
            }
        };
        trace_phase(Phase::Persisted, transcript.len());

        info!(turns = transcript.len(), persisted, "Message handled");
        Ok(Reply {
            response,
            persisted,
        })
    }

    async fn load_snapshot(&self) -> Transcript {
        match self.store.load().await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Transcript unavailable, starting empty");
                Transcript::new()
            }
        }
    }
}

fn trace_phase(phase: Phase, turns: usize) {
    debug!(phase = %phase, turns, "Pipeline phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::DEFAULT_INSTRUCTION;
    use crate::testing::{FailingEngine, FaultyStore, ScriptedEngine, StallingEngine};
    use parley_core::error::StoreError;
    use parley_core::turn::Sender;
    use parley_store::{InMemoryStore, JsonFileStore};

    fn pizza_transcript() -> Transcript {
        vec![
            Turn::user("I like pizza").unwrap(),
            Turn::bot("Pizza is great with cheese").unwrap(),
            Turn::user("What about pasta").unwrap(),
        ]
        .into()
    }

    #[tokio::test]
    async fn first_message_end_to_end() {
        let engine = Arc::new(ScriptedEngine::reply("Paris. User: thanks"));
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(engine.clone(), store.clone());

        let reply = orchestrator
            .handle_message("What is the capital of France?")
            .await
            .unwrap();

        assert_eq!(reply.response, "Paris.");
        assert!(reply.persisted);

        let prompt = &engine.requests()[0].prompt_text;
        assert_eq!(
            prompt,
            &format!(
                "{DEFAULT_INSTRUCTION}\n\nPrevious relevant conversation:\n\n\nUser: What is the capital of France?\nAssistant:"
            )
        );

        let saved = store.load().await.unwrap();
        let senders: Vec<Sender> = saved.iter().map(|t| t.sender()).collect();
        assert_eq!(senders, [Sender::User, Sender::Bot]);
        assert_eq!(saved.turns()[0].text(), "What is the capital of France?");
        assert_eq!(saved.turns()[1].text(), "Paris.");
    }

    #[tokio::test]
    async fn relevant_turns_reach_the_prompt() {
        let engine = Arc::new(ScriptedEngine::reply("Cheese pairs well."));
        let store = Arc::new(InMemoryStore::with_transcript(pizza_transcript()));
        let orchestrator = Orchestrator::new(engine.clone(), store);

        orchestrator
            .handle_message("Tell me more about pizza and cheese")
            .await
            .unwrap();

        let prompt = &engine.requests()[0].prompt_text;
        assert!(prompt.contains(
            "Previous relevant conversation:\nAssistant: Pizza is great with cheese\n\nUser: Tell me more about pizza and cheese\nAssistant:"
        ));
        assert!(!prompt.contains("I like pizza"));
        assert!(!prompt.contains("What about pasta"));
    }

    #[tokio::test]
    async fn new_prompt_is_not_its_own_context() {
        let engine = Arc::new(ScriptedEngine::reply("ok"));
        let orchestrator = Orchestrator::new(engine.clone(), Arc::new(InMemoryStore::new()));

        orchestrator.handle_message("alpha beta gamma").await.unwrap();

        let prompt = &engine.requests()[0].prompt_text;
        assert!(prompt.contains("Previous relevant conversation:\n\n\nUser: alpha beta gamma"));
    }

    #[tokio::test]
    async fn previous_exchange_becomes_context() {
        let engine = Arc::new(ScriptedEngine::replies([
            "Memory safe and fast.",
            "It has no garbage collector.",
        ]));
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(engine.clone(), store.clone());

        orchestrator.handle_message("what is rust exactly").await.unwrap();
        let reply = orchestrator
            .handle_message("is rust exactly like C")
            .await
            .unwrap();

        assert_eq!(reply.response, "It has no garbage collector.");
        let second_prompt = &engine.requests()[1].prompt_text;
        assert!(second_prompt.contains("User: what is rust exactly\n\nUser: is rust exactly like C"));
        assert_eq!(store.load().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn context_limit_bounds_the_prompt() {
        let history: Transcript = (0..10)
            .map(|i| Turn::user(format!("green tea cup{i}")).unwrap())
            .collect();
        let engine = Arc::new(ScriptedEngine::reply("ok"));
        let orchestrator = Orchestrator::new(engine.clone(), Arc::new(InMemoryStore::with_transcript(history)))
            .with_context_limit(2);

        orchestrator.handle_message("green tea please").await.unwrap();

        let prompt = &engine.requests()[0].prompt_text;
        assert!(prompt.contains("User: green tea cup8\nUser: green tea cup9\n\n"));
        assert!(!prompt.contains("cup7"));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_generating() {
        let engine = Arc::new(ScriptedEngine::reply("unused"));
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(engine.clone(), store.clone());

        let err = orchestrator.handle_message("   \n").await.unwrap_err();
        assert!(matches!(err, Error::EmptyMessage));
        assert_eq!(engine.sessions_opened(), 0);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_persists_nothing() {
        let store = Arc::new(FaultyStore::new(pizza_transcript()));
        let orchestrator = Orchestrator::new(Arc::new(FailingEngine::unavailable()), store.clone());

        let err = orchestrator.handle_message("hello there").await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::Unavailable(_))));
        assert_eq!(store.saves(), 0);
        assert_eq!(store.snapshot(), pizza_transcript());
    }

    #[tokio::test]
    async fn interrupted_stream_persists_nothing() {
        let store = Arc::new(FaultyStore::new(Transcript::new()));
        let orchestrator = Orchestrator::new(
            Arc::new(FailingEngine::after_fragments(["half an ans"])),
            store.clone(),
        );

        let err = orchestrator.handle_message("question").await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::StreamInterrupted(_))));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn reply_that_cleans_to_nothing_is_an_error() {
        let store = Arc::new(FaultyStore::new(Transcript::new()));
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedEngine::reply("  User: I will answer myself")),
            store.clone(),
        );

        let err = orchestrator.handle_message("hi").await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::EmptyReply)));
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn unreadable_store_is_treated_as_empty() {
        let engine = Arc::new(ScriptedEngine::reply("Fresh start."));
        let store = Arc::new(FaultyStore::new(pizza_transcript()).unreadable());
        let orchestrator = Orchestrator::new(engine.clone(), store.clone());

        let reply = orchestrator
            .handle_message("Tell me more about pizza and cheese")
            .await
            .unwrap();

        assert_eq!(reply.response, "Fresh start.");
        assert!(engine.requests()[0].prompt_text.contains("Previous relevant conversation:\n\n\n"));
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn write_failure_still_returns_reply_by_default() {
        let store = Arc::new(FaultyStore::new(Transcript::new()).unwritable());
        let orchestrator = Orchestrator::new(Arc::new(ScriptedEngine::reply("Answer.")), store);

        let reply = orchestrator.handle_message("question").await.unwrap();
        assert_eq!(reply.response, "Answer.");
        assert!(!reply.persisted);
    }

    #[tokio::test]
    async fn write_failure_is_an_error_when_strict() {
        let store = Arc::new(FaultyStore::new(Transcript::new()).unwritable());
        let orchestrator = Orchestrator::new(Arc::new(ScriptedEngine::reply("Answer.")), store)
            .with_strict_persistence(true);

        let err = orchestrator.handle_message("question").await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::WriteFailure(_))));
    }

    #[tokio::test]
    async fn history_does_not_wait_for_a_turn_in_flight() {
        let store = Arc::new(InMemoryStore::with_transcript(pizza_transcript()));
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(StallingEngine), store));

        let busy = orchestrator.clone();
        let pending = tokio::spawn(async move { busy.handle_message("still thinking").await });
        while orchestrator.turn_lock.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        let history = tokio::time::timeout(Duration::from_secs(5), orchestrator.history())
            .await
            .expect("history blocked behind the generating turn");
        assert_eq!(history, pizza_transcript());

        pending.abort();
    }

    #[tokio::test]
    async fn concurrent_messages_are_serialized() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(ScriptedEngine::reply("ack")), store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.handle_message(&format!("message {i}")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let saved = store.load().await.unwrap();
        assert_eq!(saved.len(), 16);
        for pair in saved.turns().chunks(2) {
            assert_eq!(pair[0].sender(), Sender::User);
            assert_eq!(pair[1].sender(), Sender::Bot);
        }
    }

    #[tokio::test]
    async fn from_config_applies_generation_and_prompt_settings() {
        let mut config = AppConfig::default();
        config.generation.temperature = 0.1;
        config.generation.max_tokens = 64;
        config.prompt.instruction = Some("Be brief.".into());
        config.persistence.strict = true;

        let engine = Arc::new(ScriptedEngine::reply("Short."));
        let store = Arc::new(FaultyStore::new(Transcript::new()).unwritable());
        let orchestrator = Orchestrator::from_config(&config, engine.clone(), store);

        assert!(orchestrator.handle_message("hi").await.is_err());
        let request = &engine.requests()[0];
        assert_eq!(request.temperature, 0.1);
        assert_eq!(request.max_tokens, 64);
        assert!(request.prompt_text.starts_with("Be brief.\n\n"));
    }

    #[tokio::test]
    async fn json_file_history_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chat_history.json");

        {
            let orchestrator = Orchestrator::new(
                Arc::new(ScriptedEngine::reply("Paris.")),
                Arc::new(JsonFileStore::new(&path)),
            );
            orchestrator.handle_message("capital of France?").await.unwrap();
        }

        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedEngine::reply("unused")),
            Arc::new(JsonFileStore::new(&path)),
        );
        let history = orchestrator.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[1].text(), "Paris.");
    }
}
