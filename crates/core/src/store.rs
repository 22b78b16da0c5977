//! Transcript store trait: durable storage for the conversation history.
//!
//! The store hands out whole snapshots and accepts whole transcripts back.
//! There is no partial update: `save` replaces what was stored, so a reply
//! and the message it answers are persisted together or not at all.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::turn::Transcript;

/// The core TranscriptStore trait.
///
/// Implementations: JSON file, in-memory (for testing).
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// The backend name (e.g., "json_file", "in_memory").
    fn name(&self) -> &str;

    /// Load the current transcript. A store that has never been written
    /// returns an empty transcript, not an error.
    async fn load(&self) -> Result<Transcript, StoreError>;

    /// Replace the stored transcript with `transcript`.
    async fn save(&self, transcript: &Transcript) -> Result<(), StoreError>;
}
