//! Ledger store - durable persistence for the marketplace record sets
//!
//! The store works on whole snapshots: every mutation builds a working
//! copy of all record sets and persists it in one `save` call, so task,
//! escrow, wallet and transaction changes commit together or not at all.
//! On disk each entity set stays a JSON array in its own file for
//! compatibility with the original layout.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::{Application, Escrow, PendingEscrow, Task, Transaction, Wallet};

/// All persisted record sets, loaded and saved as one unit
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub tasks: Vec<Task>,
    pub pending_escrows: Vec<PendingEscrow>,
    pub escrows: Vec<Escrow>,
    pub wallets: Vec<Wallet>,
    pub transactions: Vec<Transaction>,
    pub applications: Vec<Application>,
}

impl LedgerSnapshot {
    pub fn task(&self, task_id: uuid::Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: uuid::Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn wallet_mut(&mut self, user_id: &str) -> Option<&mut Wallet> {
        self.wallets.iter_mut().find(|w| w.user_id == user_id)
    }
}

/// Durable backing for the ledger. `load` must tolerate an empty medium
/// (first run); `save` failures abort the enclosing operation with no
/// side effects considered committed.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> EscrowResult<LedgerSnapshot>;
    fn save(&self, snapshot: &LedgerSnapshot) -> EscrowResult<()>;
}

/// File-backed store: one JSON array per entity set under a data directory.
/// Writes go through a temp file and rename so a reader never observes a
/// torn set.
pub struct JsonFileStore {
    dir: PathBuf,
}

const TASKS_FILE: &str = "tasks.json";
const PENDING_ESCROWS_FILE: &str = "pending_escrows.json";
const ESCROWS_FILE: &str = "escrows.json";
const WALLETS_FILE: &str = "wallets.json";
const TRANSACTIONS_FILE: &str = "transactions.json";
const APPLICATIONS_FILE: &str = "applications.json";

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> EscrowResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| EscrowError::store_unavailable(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn read_set<T: DeserializeOwned>(&self, file: &str) -> EscrowResult<Vec<T>> {
        let path = self.dir.join(file);
        let data = match fs::read(&path) {
            Ok(data) => data,
            // Missing set reads as empty; the first save creates it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                warn!("ledger read failed for {}: {}", path.display(), e);
                return Err(EscrowError::store_unavailable(format!("read {file}: {e}")));
            }
        };
        serde_json::from_slice(&data).map_err(EscrowError::from)
    }

    fn write_set<T: Serialize>(&self, file: &str, records: &[T]) -> EscrowResult<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        let data = serde_json::to_vec_pretty(records)?;
        fs::write(&tmp, data)
            .map_err(|e| EscrowError::store_unavailable(format!("write {file}: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| EscrowError::store_unavailable(format!("commit {file}: {e}")))?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> EscrowResult<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            tasks: self.read_set(TASKS_FILE)?,
            pending_escrows: self.read_set(PENDING_ESCROWS_FILE)?,
            escrows: self.read_set(ESCROWS_FILE)?,
            wallets: self.read_set(WALLETS_FILE)?,
            transactions: self.read_set(TRANSACTIONS_FILE)?,
            applications: self.read_set(APPLICATIONS_FILE)?,
        })
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> EscrowResult<()> {
        self.write_set(TASKS_FILE, &snapshot.tasks)?;
        self.write_set(PENDING_ESCROWS_FILE, &snapshot.pending_escrows)?;
        self.write_set(ESCROWS_FILE, &snapshot.escrows)?;
        self.write_set(WALLETS_FILE, &snapshot.wallets)?;
        self.write_set(TRANSACTIONS_FILE, &snapshot.transactions)?;
        self.write_set(APPLICATIONS_FILE, &snapshot.applications)?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryStore {
    snapshot: std::sync::Mutex<LedgerSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> EscrowResult<LedgerSnapshot> {
        Ok(self
            .snapshot
            .lock()
            .map_err(|_| EscrowError::store_unavailable("memory store poisoned"))?
            .clone())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> EscrowResult<()> {
        *self
            .snapshot
            .lock()
            .map_err(|_| EscrowError::store_unavailable("memory store poisoned"))? =
            snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, Money, TaskDraft};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_snapshot() -> LedgerSnapshot {
        let draft = TaskDraft {
            title: "Design a logo".to_string(),
            description: "SVG deliverable".to_string(),
            reward: Money::new(10_000_000, Currency::Usdc),
            deadline: Utc::now() + chrono::Duration::days(7),
        };
        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .tasks
            .push(Task::from_draft(&draft, "client-1", Uuid::new_v4()));
        snapshot.wallets.push(Wallet::new("client-1".to_string()));
        snapshot
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].id, snapshot.tasks[0].id);
        assert_eq!(loaded.wallets[0].user_id, "client-1");
        assert!(loaded.escrows.is_empty());
    }

    #[test]
    fn test_missing_files_load_as_empty_sets() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.tasks.is_empty());
        assert!(loaded.transactions.is_empty());
    }

    #[test]
    fn test_save_overwrites_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        store.save(&sample_snapshot()).unwrap();
        store.save(&LedgerSnapshot::default()).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.tasks.is_empty());
        assert!(loaded.wallets.is_empty());
    }
}
