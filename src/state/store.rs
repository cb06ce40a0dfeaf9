//! Atomic JSON persistence for LoopState, with WAL-guarded crash recovery.
//!
//! Strategy: write to `state.json.tmp`, then atomically rename to
//! `state.json`. Never rename over a partially-written file; never leave the
//! directory without a valid `state.json` unless a `.tmp` stands in for it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

use super::loop_state::LoopState;

const STATE_FILENAME: &str = "state.json";
const TMP_SUFFIX: &str = "tmp";
const WAL_FILENAME: &str = "rollback_wal.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackWal {
    pub status: WalStatus,
    pub from_hash: String,
    pub to_hash: String,
    pub label: String,
    pub reason: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalStatus {
    Started,
    Completed,
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILENAME)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(STATE_FILENAME).with_extension(TMP_SUFFIX)
    }

    fn wal_path(&self) -> PathBuf {
        self.dir.join(WAL_FILENAME)
    }

    /// Serialize and atomically persist the aggregate. Sets and maps inside
    /// `LoopState` are `BTreeSet`/`BTreeMap`, so serialization order is
    /// deterministic without any extra sorting here.
    pub fn save(&self, state: &LoopState) -> StateResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, self.state_path())?;
        Ok(())
    }

    /// Load the aggregate, adopting an orphaned `.tmp` file if the rename was
    /// interrupted between write and rename on a previous run.
    pub fn load(&self) -> StateResult<LoopState> {
        let state_path = self.state_path();
        let tmp_path = self.tmp_path();

        if !state_path.exists() && tmp_path.exists() {
            std::fs::rename(&tmp_path, &state_path)?;
        }

        if !state_path.exists() {
            return Err(StateError::NotFound { path: state_path });
        }

        let content = std::fs::read_to_string(&state_path)?;
        serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: e.to_string(),
        })
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists() || self.tmp_path().exists()
    }

    pub fn write_wal(&self, wal: &RollbackWal) -> StateResult<()> {
        let content = serde_json::to_string_pretty(wal)?;
        std::fs::write(self.wal_path(), content)?;
        Ok(())
    }

    pub fn read_wal(&self) -> StateResult<Option<RollbackWal>> {
        let path = self.wal_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let wal = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: e.to_string(),
        })?;
        Ok(Some(wal))
    }

    pub fn clear_wal(&self) -> StateResult<()> {
        let path = self.wal_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::loop_state::LoopState;

    fn sample_state() -> LoopState {
        LoopState::new("sprint-a", "sprint-a-1", "main")
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = sample_state();
        store.save(&state).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.sprint_id, state.sprint_id);
        assert_eq!(loaded.iteration, state.iteration);
    }

    #[test]
    fn load_adopts_orphaned_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = sample_state();
        let content = serde_json::to_string_pretty(&state).unwrap();
        std::fs::write(store.tmp_path(), content).unwrap();

        assert!(!store.state_path().exists());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.sprint_id, state.sprint_id);
        assert!(store.state_path().exists());
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn load_missing_state_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(store.load(), Err(StateError::NotFound { .. })));
    }

    #[test]
    fn wal_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.read_wal().unwrap().is_none());

        let wal = RollbackWal {
            status: WalStatus::Started,
            from_hash: "a".into(),
            to_hash: "b".into(),
            label: "qc_pass".into(),
            reason: "regression".into(),
            iteration: 3,
        };
        store.write_wal(&wal).unwrap();
        let read_back = store.read_wal().unwrap().unwrap();
        assert_eq!(read_back.to_hash, "b");

        store.clear_wal().unwrap();
        assert!(store.read_wal().unwrap().is_none());
    }
}
