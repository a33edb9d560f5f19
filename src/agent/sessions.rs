//! Persistent transcripts
//!
//! Allows saving a session's transcript to disk and listing what was saved.
//! Records are plain JSON files named after their id.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::transcript::ChatMessage;
use crate::codegen::GenerationMode;

/// Error type for session storage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is malformed: {0}")]
    Format(#[from] serde_json::Error),
    #[error("could not determine home directory")]
    NoHome,
}

/// A saved transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique session ID
    pub id: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Model the transcript was produced with
    pub model: String,
    /// Mode active when the record was last saved
    pub mode: GenerationMode,
    pub messages: Vec<ChatMessage>,
}

impl SessionRecord {
    pub fn new(model: impl Into<String>, mode: GenerationMode) -> Self {
        let now = Timestamp::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            created_at: now,
            updated_at: now,
            model: model.into(),
            mode,
            messages: Vec::new(),
        }
    }

    /// Replace the stored transcript with the current one
    pub fn update(&mut self, mode: GenerationMode, messages: &[ChatMessage]) {
        self.mode = mode;
        self.messages = messages.to_vec();
        self.updated_at = Timestamp::now();
    }

    /// First user prompt, used as the record's title
    pub fn title(&self) -> &str {
        self.messages
            .iter()
            .find_map(|message| match message {
                ChatMessage::User { text } => Some(text.as_str()),
                ChatMessage::Assistant { .. } => None,
            })
            .unwrap_or("(empty)")
    }
}

/// Summary of a record for listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub model: String,
    pub updated_at: Timestamp,
    pub message_count: usize,
}

/// Directory of saved records
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Open a store, creating its directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Open the store at ~/.pyscribe/sessions
    pub fn default_store() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::NoHome)?;
        Self::new(home.join(".pyscribe").join("sessions"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn save(&self, record: &SessionRecord) -> Result<PathBuf, StoreError> {
        let path = self.record_path(&record.id);
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<SessionRecord, StoreError> {
        Self::load_from_path(&self.record_path(id))
    }

    /// List saved records, most recently updated first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(record) = Self::load_from_path(&path) {
                    summaries.push(SessionSummary {
                        title: truncate(record.title(), 50),
                        message_count: record.messages.len(),
                        id: record.id,
                        model: record.model,
                        updated_at: record.updated_at,
                    });
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        std::fs::remove_file(self.record_path(id))?;
        Ok(())
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    fn load_from_path(path: &Path) -> Result<SessionRecord, StoreError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Truncate to at most `max_chars` characters, adding an ellipsis if cut
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
