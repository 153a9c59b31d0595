//! Per-entity processing state: the single source of truth for resumability
//!
//! One JSON document per entity type holds the set of completed file paths
//! and a map of failed paths to their last error. The document is rewritten
//! atomically (temp file + rename) after every file, and the whole state
//! directory entry is guarded by an advisory `flock` so two orchestrators
//! cannot corrupt each other's completion record.

use adp_common::error::{AdpError, Result};
use adp_common::schema::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable per-entity progress record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingState {
    /// Relative paths of files fully processed; append-only except `reset`
    #[serde(default)]
    pub completed: Vec<String>,

    /// Relative paths of failed files mapped to their last error
    #[serde(default)]
    pub failed: HashMap<String, String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl ProcessingState {
    pub fn is_completed(&self, file: &str) -> bool {
        self.completed.iter().any(|f| f == file)
    }

    /// Record a completed file; clears any previous failure for it
    pub fn mark_completed(&mut self, file: &str) {
        self.failed.remove(file);
        if !self.is_completed(file) {
            self.completed.push(file.to_string());
        }
        self.updated_at = Utc::now();
    }

    /// Record a failure; a file that already completed stays completed
    pub fn mark_failed(&mut self, file: &str, error: &str) {
        if self.is_completed(file) {
            return;
        }
        self.failed.insert(file.to_string(), error.to_string());
        self.updated_at = Utc::now();
    }
}

/// Advisory lock held for the lifetime of a [`StateStore`]
#[derive(Debug)]
struct StateLock {
    _file: File,
}

impl StateLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            // LOCK_EX = exclusive, LOCK_NB = fail instead of blocking
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(AdpError::LockUnavailable(path.display().to_string()));
                }
                return Err(AdpError::Io(err));
            }
        }

        Ok(Self { _file: file })
    }
}

/// Handle to one entity's state file, lock held while the handle lives
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    entity: Entity,
    _lock: StateLock,
}

impl StateStore {
    /// Create the state directory if needed and take the entity lock
    pub fn open(dir: impl AsRef<Path>, entity: Entity) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let lock = StateLock::acquire(&dir.join(format!("{}.lock", entity)))?;
        Ok(Self {
            dir,
            entity,
            _lock: lock,
        })
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.entity))
    }

    /// Load the persisted state; a missing file is a fresh start
    pub fn load(&self) -> Result<ProcessingState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(ProcessingState::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            AdpError::State(format!("corrupt state file {}: {}", path.display(), e))
        })
    }

    /// Atomically rewrite the state file
    pub fn save(&self, state: &ProcessingState) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.flush()?;
        tmp.persist(self.state_path())
            .map_err(|e| AdpError::State(format!("failed to persist state file: {}", e)))?;
        Ok(())
    }

    /// Explicitly discard all recorded progress for this entity
    pub fn reset(&self) -> Result<()> {
        let path = self.state_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_state_file_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path(), Entity::Works).unwrap();
        let state = store.load().unwrap();
        assert!(state.completed.is_empty());
        assert!(state.failed.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path(), Entity::Authors).unwrap();

        let mut state = ProcessingState::default();
        state.mark_completed("data/authors/updated_date=2024-01-01/part_000.gz");
        state.mark_failed("data/authors/updated_date=2024-01-01/part_001.gz", "timeout");
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.completed, state.completed);
        assert_eq!(loaded.failed, state.failed);
    }

    #[test]
    fn test_completion_clears_failure_and_is_idempotent() {
        let mut state = ProcessingState::default();
        state.mark_failed("part_000.gz", "boom");
        state.mark_completed("part_000.gz");
        state.mark_completed("part_000.gz");
        assert_eq!(state.completed.len(), 1);
        assert!(state.failed.is_empty());
    }

    #[test]
    fn test_failure_never_demotes_completion() {
        let mut state = ProcessingState::default();
        state.mark_completed("part_000.gz");
        state.mark_failed("part_000.gz", "late error");
        assert!(state.is_completed("part_000.gz"));
        assert!(state.failed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_excludes_second_store() {
        let dir = tempfile::tempdir().unwrap();
        let _first = StateStore::open(dir.path(), Entity::Works).unwrap();
        let second = StateStore::open(dir.path(), Entity::Works);
        assert!(matches!(second, Err(AdpError::LockUnavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_is_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        let _works = StateStore::open(dir.path(), Entity::Works).unwrap();
        assert!(StateStore::open(dir.path(), Entity::Authors).is_ok());
    }

    #[test]
    fn test_reset_discards_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path(), Entity::Concepts).unwrap();
        let mut state = ProcessingState::default();
        state.mark_completed("part_000.gz");
        store.save(&state).unwrap();

        store.reset().unwrap();
        assert!(store.load().unwrap().completed.is_empty());
    }
}
