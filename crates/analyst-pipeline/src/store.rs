//! Durable session state: memory, dataset snapshots, checkpoint, chat log and
//! knowledge base, all under one session directory.
//!
//! Overwritten files go through a temp file and a rename so a crash mid-write
//! never leaves a truncated state file behind. Every I/O failure surfaces as
//! [`AnalystError::Persistence`].

use std::path::{Path, PathBuf};

use analyst_types::{AnalystError, ChatTurn, Dataset, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::stage::Artifacts;

pub const MEMORY_FILE: &str = "memory.txt";
pub const DATASET_FILE: &str = "dataset.csv";
pub const ORIGINAL_FILE: &str = "original.csv";
pub const CHECKPOINT_FILE: &str = "session.json";
pub const CHAT_FILE: &str = "chat_history.jsonl";
pub const KNOWLEDGE_FILE: &str = "knowledge_base.md";

/// Snapshot of session progress for resumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    /// Rounds completed in the current session attempt.
    pub round: usize,
    /// Rounds across every attempt, restarts included.
    #[serde(default)]
    pub total_rounds: usize,
    pub restarts: usize,
    pub artifacts: Artifacts,
    /// Stage outputs of the current attempt, oldest first.
    #[serde(default)]
    pub outputs: Vec<String>,
    pub finished: bool,
    /// RFC 3339 timestamp of when the checkpoint was written.
    pub timestamp: String,
}

impl SessionCheckpoint {
    pub fn new(round: usize, restarts: usize, artifacts: Artifacts, finished: bool) -> Self {
        Self {
            round,
            total_rounds: round,
            restarts,
            artifacts,
            outputs: Vec::new(),
            finished,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_progress(mut self, total_rounds: usize, outputs: Vec<String>) -> Self {
        self.total_rounds = total_rounds.max(self.round);
        self.outputs = outputs;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a session directory.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AnalystError::persistence(&dir, e))?;
        Ok(Self { dir })
    }

    /// Open an existing session directory without creating it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(AnalystError::persistence(
                &dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "session directory not found"),
            ));
        }
        Ok(Self { dir })
    }

    /// Fresh, uniquely named session directory under `root`.
    pub async fn new_session_dir(root: &Path) -> Result<Self> {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let short = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("session-{stamp}-{}", &short[..8]);
        Self::create(root.join(name)).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    // -- memory --------------------------------------------------------------

    pub async fn save_memory(&self, memory: &str) -> Result<()> {
        self.write_atomic(MEMORY_FILE, memory.as_bytes()).await
    }

    pub async fn load_memory(&self) -> Result<String> {
        Ok(self.read_optional(MEMORY_FILE).await?.unwrap_or_default())
    }

    // -- datasets ------------------------------------------------------------

    pub async fn save_dataset(&self, dataset: &Dataset) -> Result<()> {
        self.write_dataset(DATASET_FILE, dataset).await
    }

    pub async fn save_original(&self, dataset: &Dataset) -> Result<()> {
        self.write_dataset(ORIGINAL_FILE, dataset).await
    }

    pub async fn load_dataset(&self) -> Result<Dataset> {
        Dataset::load_csv(&self.path(DATASET_FILE))
    }

    /// The restart baseline, falling back to the working snapshot.
    pub async fn load_original(&self) -> Result<Dataset> {
        let original = self.path(ORIGINAL_FILE);
        if tokio::fs::try_exists(&original).await.unwrap_or(false) {
            Dataset::load_csv(&original)
        } else {
            self.load_dataset().await
        }
    }

    // -- checkpoint ----------------------------------------------------------

    pub async fn save_checkpoint(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
        let json = serde_json::to_string_pretty(checkpoint)?;
        self.write_atomic(CHECKPOINT_FILE, json.as_bytes()).await
    }

    /// `Ok(None)` when no checkpoint was written yet.
    pub async fn load_checkpoint(&self) -> Result<Option<SessionCheckpoint>> {
        match self.read_optional(CHECKPOINT_FILE).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // -- append-only logs ----------------------------------------------------

    pub async fn append_chat(&self, turn: &ChatTurn) -> Result<()> {
        let mut line = serde_json::to_string(turn)?;
        line.push('\n');
        self.append(CHAT_FILE, &line).await
    }

    /// All recorded turns. Unreadable lines are skipped.
    pub async fn load_chat_history(&self) -> Result<Vec<ChatTurn>> {
        let Some(text) = self.read_optional(CHAT_FILE).await? else {
            return Ok(Vec::new());
        };
        let mut turns = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(turn) => turns.push(turn),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed chat history line"),
            }
        }
        Ok(turns)
    }

    pub async fn append_knowledge(&self, heading: &str, body: &str) -> Result<()> {
        let entry = format!("## {heading}\n\n{}\n\n", body.trim_end());
        self.append(KNOWLEDGE_FILE, &entry).await
    }

    // -- helpers -------------------------------------------------------------

    async fn write_dataset(&self, file: &str, dataset: &Dataset) -> Result<()> {
        let csv = dataset.to_csv_string()?;
        self.write_atomic(file, csv.as_bytes()).await
    }

    async fn write_atomic(&self, file: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path(file);
        let tmp = self.path(&format!(".{file}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| AnalystError::persistence(&tmp, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| AnalystError::persistence(&target, e))?;
        tracing::debug!(path = %target.display(), bytes = bytes.len(), "Session file written");
        Ok(())
    }

    async fn append(&self, file: &str, text: &str) -> Result<()> {
        let path = self.path(file);
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AnalystError::persistence(&path, e))?;
        handle
            .write_all(text.as_bytes())
            .await
            .map_err(|e| AnalystError::persistence(&path, e))?;
        handle
            .flush()
            .await
            .map_err(|e| AnalystError::persistence(&path, e))?;
        tracing::debug!(path = %path.display(), "Session log appended");
        Ok(())
    }

    async fn read_optional(&self, file: &str) -> Result<Option<String>> {
        let path = self.path(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AnalystError::persistence(&path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
