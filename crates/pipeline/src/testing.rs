//! In-process engines and stores for tests.
//!
//! Enabled for this crate's own tests and, for downstream crates, through
//! the `testing` feature.

use async_trait::async_trait;
use parley_core::engine::{EngineSession, FragmentStream, GenerationEngine, GenerationRequest};
use parley_core::error::{GenerationError, StoreError};
use parley_core::store::TranscriptStore;
use parley_core::turn::Transcript;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// An engine that answers from a fixed script.
///
/// Each session takes the next scripted reply; the last one repeats once the
/// script runs out. Every request is recorded for later inspection.
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Vec<String>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    sessions: Mutex<usize>,
}

impl ScriptedEngine {
    /// One reply per session, in order.
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| vec![r.into()]).collect())
    }

    /// Always answer `text` in a single fragment.
    pub fn reply(text: &str) -> Self {
        Self::replies([text])
    }

    /// Always answer with these fragments.
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(VecDeque::from([fragments.into_iter().map(Into::into).collect()]))
    }

    fn new(script: VecDeque<Vec<String>>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Arc::new(Mutex::new(Vec::new())),
            sessions: Mutex::new(0),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn sessions_opened(&self) -> usize {
        *self.sessions.lock().unwrap()
    }

    fn next_reply(&self) -> Vec<String> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_session(&self) -> Result<Box<dyn EngineSession>, GenerationError> {
        *self.sessions.lock().unwrap() += 1;
        Ok(Box::new(ScriptedSession {
            requests: self.requests.clone(),
            fragments: self.next_reply(),
        }))
    }
}

struct ScriptedSession {
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    fragments: Vec<String>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn generate(
        self: Box<Self>,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        self.requests.lock().unwrap().push(request);
        Ok(preloaded(self.fragments.into_iter().map(Ok).collect()))
    }
}

/// An engine that fails, either before streaming or part way through.
pub struct FailingEngine {
    partial: Option<Vec<String>>,
}

impl FailingEngine {
    /// Refuses to open a session.
    pub fn unavailable() -> Self {
        Self { partial: None }
    }

    /// Streams `fragments`, then reports an interrupted stream.
    pub fn after_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            partial: Some(fragments.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl GenerationEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn chat_session(&self) -> Result<Box<dyn EngineSession>, GenerationError> {
        match &self.partial {
            None => Err(GenerationError::Unavailable("engine is offline".into())),
            Some(fragments) => Ok(Box::new(InterruptedSession {
                fragments: fragments.clone(),
            })),
        }
    }
}

struct InterruptedSession {
    fragments: Vec<String>,
}

#[async_trait]
impl EngineSession for InterruptedSession {
    async fn generate(
        self: Box<Self>,
        _request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let mut items: Vec<Result<String, GenerationError>> =
            self.fragments.into_iter().map(Ok).collect();
        items.push(Err(GenerationError::StreamInterrupted("connection reset".into())));
        Ok(preloaded(items))
    }
}

/// An engine whose stream never produces anything and never ends.
pub struct StallingEngine;

#[async_trait]
impl GenerationEngine for StallingEngine {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn chat_session(&self) -> Result<Box<dyn EngineSession>, GenerationError> {
        Ok(Box::new(StallingSession))
    }
}

struct StallingSession;

#[async_trait]
impl EngineSession for StallingSession {
    async fn generate(
        self: Box<Self>,
        _request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _keep_open = tx;
            std::future::pending::<()>().await;
        });
        Ok(rx)
    }
}

fn preloaded(items: Vec<Result<String, GenerationError>>) -> FragmentStream {
    let (tx, rx) = mpsc::channel(items.len().max(1));
    for item in items {
        let _ = tx.try_send(item);
    }
    rx
}

/// An in-memory store that can be told to fail loads or saves.
#[derive(Default)]
pub struct FaultyStore {
    transcript: Mutex<Transcript>,
    fail_load: bool,
    fail_save: bool,
    saves: Mutex<usize>,
}

impl FaultyStore {
    pub fn new(transcript: Transcript) -> Self {
        Self {
            transcript: Mutex::new(transcript),
            ..Self::default()
        }
    }

    /// Every load reports an unreadable medium.
    pub fn unreadable(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Every save reports a write failure.
    pub fn unwritable(mut self) -> Self {
        self.fail_save = true;
        self
    }

    /// What the store currently holds.
    pub fn snapshot(&self) -> Transcript {
        self.transcript.lock().unwrap().clone()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl TranscriptStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn load(&self) -> Result<Transcript, StoreError> {
        if self.fail_load {
            return Err(StoreError::Unavailable("medium unreadable".into()));
        }
        Ok(self.snapshot())
    }

    async fn save(&self, transcript: &Transcript) -> Result<(), StoreError> {
        if self.fail_save {
            return Err(StoreError::WriteFailure("disk full".into()));
        }
        *self.transcript.lock().unwrap() = transcript.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}
