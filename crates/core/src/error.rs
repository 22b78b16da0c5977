//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator (store, engine) has its own error enum.

use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Transcript store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Generation errors ---
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    // --- Input validation ---
    #[error("Message is empty")]
    EmptyMessage,

    #[error("A turn must have non-empty text")]
    EmptyTurn,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing medium could not be read, or is not a transcript at all.
    #[error("Transcript store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to write transcript: {0}")]
    WriteFailure(String),

    /// A single persisted entry is malformed (missing field, bad sender, empty text).
    #[error("Corrupt transcript entry #{index}: {reason}")]
    CorruptEntry { index: usize, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Engine produced an empty reply")]
    EmptyReply,

    #[error("Inference failed: {0}")]
    Inference(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_error_displays_correctly() {
        let err = Error::Generation(GenerationError::Api {
            status_code: 503,
            message: "model loading".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model loading"));
    }

    #[test]
    fn store_error_converts_into_top_level() {
        let err: Error = StoreError::WriteFailure("disk full".into()).into();
        assert!(matches!(err, Error::Store(StoreError::WriteFailure(_))));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn corrupt_entry_names_index() {
        let err = StoreError::CorruptEntry {
            index: 3,
            reason: "unknown sender".into(),
        };
        assert!(err.to_string().contains("#3"));
    }
}
