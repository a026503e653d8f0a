// Background snapshot writer

use crate::models::Snapshot;
use crate::storage::SnapshotStorage;
use crate::telemetry;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Persists published store snapshots one at a time, in publication order.
///
/// A burst of mutations while a save is in flight collapses into a single
/// save of the newest snapshot. When the store is dropped the latest unseen
/// snapshot is still written before the task ends.
pub struct SnapshotWriter;

impl SnapshotWriter {
    pub fn spawn(
        storage: Arc<dyn SnapshotStorage>,
        mut snapshots: watch::Receiver<Arc<Snapshot>>,
    ) -> JoinHandle<()> {
        // The current value is what was just loaded; nothing to write.
        snapshots.borrow_and_update();

        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                persist(storage.as_ref(), &snapshot).await;
            }

            info!("Snapshot writer stopped");
        })
    }
}

/// Save failures are logged only; the in-memory store stays authoritative.
async fn persist(storage: &dyn SnapshotStorage, snapshot: &Snapshot) {
    match storage.save(snapshot).await {
        Ok(()) => debug!(pending = snapshot.len(), "Snapshot persisted"),
        Err(e) => {
            error!(error = %e, pending = snapshot.len(), "Failed to persist snapshot");
            telemetry::record_persistence_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueuedMessage;
    use crate::storage::MemoryStorage;
    use chrono::Utc;

    fn snapshot_of(keys: &[&str]) -> Arc<Snapshot> {
        Arc::new(
            keys.iter()
                .map(|key| {
                    (
                        key.to_string(),
                        QueuedMessage {
                            key: key.to_string(),
                            title: None,
                            message: "m".to_string(),
                            due_at: Utc::now(),
                        },
                    )
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_writer_flushes_latest_snapshot_on_close() {
        let storage = Arc::new(MemoryStorage::new());
        let (tx, rx) = watch::channel(snapshot_of(&[]));
        let task = SnapshotWriter::spawn(storage.clone(), rx);

        tx.send_replace(snapshot_of(&["a"]));
        tx.send_replace(snapshot_of(&["a", "b"]));
        drop(tx);
        task.await.unwrap();

        let stored = storage.stored().unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(storage.save_count() >= 1);
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_not_rewritten() {
        let storage = Arc::new(MemoryStorage::new());
        let (tx, rx) = watch::channel(snapshot_of(&["loaded"]));
        let task = SnapshotWriter::spawn(storage.clone(), rx);

        drop(tx);
        task.await.unwrap();

        assert_eq!(storage.save_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_save_does_not_stop_writer() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_failing(true);
        let (tx, rx) = watch::channel(snapshot_of(&[]));
        let task = SnapshotWriter::spawn(storage.clone(), rx);

        tx.send_replace(snapshot_of(&["a"]));
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        storage.set_failing(false);
        tx.send_replace(snapshot_of(&["b"]));
        drop(tx);
        task.await.unwrap();

        let stored = storage.stored().unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
