//! Durable session checkpoints.
//!
//! A checkpoint captures the whole [`RunState`] of a session together with
//! where execution must continue. Suspending for human clarification saves a
//! checkpoint and returns; resuming claims it, possibly in another process.
//! A claim is atomic per store, so a suspended session is resumed at most once.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::state::{RunState, Stage};

/// Lifecycle status of a persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    AwaitingClarification,
    Completed,
    Failed,
}

/// Snapshot of a session at a stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub status: SessionStatus,

    /// Stage execution re-enters at on resume
    pub resume_at: Option<Stage>,

    /// Question awaiting a human answer
    pub pending_question: Option<String>,

    pub state: RunState,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint for a session suspended until a clarification arrives
    pub fn suspended(state: RunState, question: impl Into<String>, resume_at: Stage) -> Self {
        Self {
            session_id: state.session_id.clone(),
            status: SessionStatus::AwaitingClarification,
            resume_at: Some(resume_at),
            pending_question: Some(question.into()),
            state,
            saved_at: Utc::now(),
        }
    }

    /// The same checkpoint owned by a resuming run.
    ///
    /// The continuation and the pending question are kept so a claim stranded
    /// by a crash can be released again.
    pub fn claimed(mut self) -> Self {
        self.status = SessionStatus::Running;
        self.saved_at = Utc::now();
        self
    }

    /// Whether this is a claim that can be handed back for another resume
    pub fn is_releasable(&self) -> bool {
        self.status == SessionStatus::Running && self.resume_at.is_some()
    }

    /// Back to waiting for a clarification
    fn released(mut self) -> Self {
        self.status = SessionStatus::AwaitingClarification;
        self.saved_at = Utc::now();
        self
    }

    /// Archived checkpoint of a session that reached a terminal state
    pub fn archived(state: RunState, status: SessionStatus) -> Self {
        Self {
            session_id: state.session_id.clone(),
            status,
            resume_at: None,
            pending_question: None,
            state,
            saved_at: Utc::now(),
        }
    }
}

/// Result of trying to take ownership of a suspended session.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The session was awaiting clarification and now belongs to the caller
    Claimed(Checkpoint),
    /// The session exists in another status, or another caller holds it
    Unavailable(SessionStatus),
    NotFound,
}

/// Storage of checkpoints keyed by session id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, replacing any previous one for the session
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint of a session
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Drop the checkpoint of a session
    async fn remove(&self, session_id: &str) -> Result<()>;

    /// Atomically move a session from awaiting clarification to running.
    ///
    /// Of any number of concurrent claims on one session at most one gets
    /// [`Claim::Claimed`].
    async fn claim(&self, session_id: &str) -> Result<Claim>;

    /// Hand a stranded claim back so the session can be resumed again.
    ///
    /// Returns `false` when the session is not a releasable claim.
    async fn release(&self, session_id: &str) -> Result<bool>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store; checkpoints do not survive a restart.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    sessions: DashMap<String, Checkpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.sessions
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.sessions.get(session_id).map(|c| c.value().clone()))
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn claim(&self, session_id: &str) -> Result<Claim> {
        // The shard stays write-locked from the status check to the update
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return Ok(Claim::NotFound);
        };
        if entry.status != SessionStatus::AwaitingClarification {
            return Ok(Claim::Unavailable(entry.status));
        }
        let claimed = entry.value().clone().claimed();
        *entry.value_mut() = claimed.clone();
        Ok(Claim::Claimed(claimed))
    }

    async fn release(&self, session_id: &str) -> Result<bool> {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if !entry.is_releasable() {
            return Ok(false);
        }
        let released = entry.value().clone().released();
        *entry.value_mut() = released;
        Ok(true)
    }
}

// ============================================================================
// File store
// ============================================================================

/// One JSON document per session under a directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash never
/// leaves a half-written checkpoint behind. Claims are serialised across
/// processes by a `<session>.json.lock` file created exclusively.
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            CoreError::checkpoint(format!(
                "Failed to create checkpoint directory {}: {}",
                root.display(),
                e
            ))
        })?;
        info!("Checkpoint store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id.len() <= 128
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !session_id.starts_with('.');
        if !valid {
            return Err(CoreError::invalid_input(format!(
                "Session id '{}' is not a valid checkpoint key",
                session_id
            )));
        }
        Ok(self.root.join(format!("{}.json", session_id)))
    }

    fn lock_path(path: &Path) -> PathBuf {
        path.with_extension("json.lock")
    }

    /// Create the lock file; `false` if another claim holds it.
    async fn lock(&self, lock_path: &Path) -> Result<bool> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(CoreError::checkpoint(format!(
                "Failed to create lock {}: {}",
                lock_path.display(),
                e
            ))),
        }
    }

    async fn unlock(&self, lock_path: &Path) {
        if let Err(e) = tokio::fs::remove_file(lock_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove lock {}: {}", lock_path.display(), e);
            }
        }
    }

    async fn claim_locked(&self, session_id: &str) -> Result<Claim> {
        match self.load(session_id).await? {
            None => Ok(Claim::NotFound),
            Some(checkpoint) if checkpoint.status != SessionStatus::AwaitingClarification => {
                Ok(Claim::Unavailable(checkpoint.status))
            }
            Some(checkpoint) => {
                let claimed = checkpoint.claimed();
                self.save(&claimed).await?;
                Ok(Claim::Claimed(claimed))
            }
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.session_id)?;
        let content = serde_json::to_vec_pretty(checkpoint)?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            CoreError::checkpoint(format!("Failed to write checkpoint: {}", e))
        })?;
        tokio::fs::rename(&temp_path, &path).await.map_err(|e| {
            CoreError::checkpoint(format!("Failed to rename checkpoint: {}", e))
        })?;

        debug!("Saved checkpoint {}", path.display());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::checkpoint(format!(
                "Failed to read checkpoint {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::checkpoint(format!(
                "Failed to remove checkpoint {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn claim(&self, session_id: &str) -> Result<Claim> {
        let lock_path = Self::lock_path(&self.path_for(session_id)?);
        if !self.lock(&lock_path).await? {
            debug!("Session {} is being claimed elsewhere", session_id);
            return Ok(Claim::Unavailable(SessionStatus::Running));
        }

        let result = self.claim_locked(session_id).await;
        self.unlock(&lock_path).await;
        result
    }

    async fn release(&self, session_id: &str) -> Result<bool> {
        let path = self.path_for(session_id)?;
        // A lock left by a crashed claimer is stale by the time anyone releases
        self.unlock(&Self::lock_path(&path)).await;

        match self.load(session_id).await? {
            Some(checkpoint) if checkpoint.is_releasable() => {
                self.save(&checkpoint.released()).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
