//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use parley_core::error::StoreError;
use parley_core::store::TranscriptStore;
use parley_core::turn::Transcript;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps the transcript in process memory.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    transcript: Arc<RwLock<Transcript>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing transcript.
    pub fn with_transcript(transcript: Transcript) -> Self {
        Self {
            transcript: Arc::new(RwLock::new(transcript)),
        }
    }
}

#[async_trait]
impl TranscriptStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Transcript, StoreError> {
        Ok(self.transcript.read().await.clone())
    }

    async fn save(&self, transcript: &Transcript) -> Result<(), StoreError> {
        *self.transcript.write().await = transcript.clone();
        Ok(())
    }
}
