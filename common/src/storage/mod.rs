// Snapshot storage: durable load/save of the whole pending-message mapping

pub mod file;
pub mod memory;
pub mod writer;

pub use file::JsonFileStorage;
pub use memory::MemoryStorage;
pub use writer::SnapshotWriter;

use crate::errors::StorageError;
use crate::models::Snapshot;
use async_trait::async_trait;
use tracing::{info, warn};

/// Persistence capability for the message store
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Load the last saved snapshot. An absent snapshot is an empty mapping.
    async fn load(&self) -> Result<Snapshot, StorageError>;

    /// Overwrite the stored snapshot with `snapshot`.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError>;
}

/// Startup load: unreadable or corrupt state is logged and replaced with an
/// empty mapping so the service can still come up.
#[tracing::instrument(skip(storage))]
pub async fn load_or_empty(storage: &dyn SnapshotStorage) -> Snapshot {
    match storage.load().await {
        Ok(snapshot) => {
            info!(pending = snapshot.len(), "Loaded persisted messages");
            snapshot
        }
        Err(e) => {
            warn!(error = %e, "Failed to load persisted messages, starting empty");
            Snapshot::new()
        }
    }
}
