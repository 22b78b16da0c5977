//! File-based transcript store: one pretty-printed JSON document.
//!
//! The file holds a JSON array of `{"sender": "You"|"Bot", "text": ...}`
//! objects in conversation order, indented by two spaces with non-ASCII
//! text written verbatim. The format is human-inspectable and stable: a
//! transcript that is loaded and saved again produces identical bytes.
//!
//! Default location: `./chat_history.json`

use async_trait::async_trait;
use parley_core::error::StoreError;
use parley_core::store::TranscriptStore;
use parley_core::turn::{Transcript, Turn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A transcript store backed by a single JSON file.
///
/// Nothing is cached: every `load` reads the file and every `save` rewrites
/// it. Saves go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous transcript intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store at the given path. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default path: `chat_history.json` in the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("chat_history.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Temp file used for atomic replacement: `.<name>.tmp` beside the target.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chat_history.json".into());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    /// Decode a transcript document, skipping malformed entries.
    fn parse(content: &str) -> Result<Transcript, StoreError> {
        if content.trim().is_empty() {
            return Ok(Transcript::new());
        }

        let entries: Vec<serde_json::Value> = serde_json::from_str(content)
            .map_err(|e| StoreError::Unavailable(format!("not a transcript array: {e}")))?;

        let transcript = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value::<Turn>(value) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    let err = StoreError::CorruptEntry {
                        index,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping corrupted transcript entry");
                    None
                }
            })
            .collect();

        Ok(transcript)
    }
}

#[async_trait]
impl TranscriptStore for JsonFileStore {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn load(&self) -> Result<Transcript, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No transcript file yet, starting empty");
                return Ok(Transcript::new());
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let transcript = Self::parse(&content)?;
        debug!(path = %self.path.display(), turns = transcript.len(), "Transcript loaded");
        Ok(transcript)
    }

    async fn save(&self, transcript: &Transcript) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(transcript)
            .map_err(|e| StoreError::WriteFailure(format!("failed to serialize transcript: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::WriteFailure(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, content.as_bytes())
            .await
            .map_err(|e| StoreError::WriteFailure(format!("failed to write {}: {e}", temp.display())))?;

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::WriteFailure(format!(
                "failed to replace {}: {e}",
                self.path.display()
            )));
        }

        debug!(path = %self.path.display(), turns = transcript.len(), "Transcript saved");
        Ok(())
    }
}
