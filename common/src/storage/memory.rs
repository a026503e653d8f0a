use crate::errors::StorageError;
use crate::models::Snapshot;
use crate::storage::SnapshotStorage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory snapshot storage for tests and ephemeral runs.
///
/// `set_failing(true)` makes every load and save fail, to exercise the
/// persistence-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshot: Mutex<Option<Snapshot>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Last successfully saved snapshot
    pub fn stored(&self) -> Option<Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "memory storage set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn load(&self) -> Result<Snapshot, StorageError> {
        self.check()?;
        Ok(self.stored().unwrap_or_default())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.check()?;
        *self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
