// JSON file storage with atomic replace

use crate::errors::StorageError;
use crate::models::Snapshot;
use crate::storage::SnapshotStorage;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Stores the snapshot as pretty-printed JSON in a single file.
///
/// Saves go to a sibling `.tmp` file which is synced and then renamed over
/// the target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStorage for JsonFileStorage {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Snapshot, StorageError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot file yet");
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        if let Some((key, message)) = snapshot.iter().find(|(key, m)| m.key != **key) {
            return Err(StorageError::Corrupt(format!(
                "entry '{}' embeds key '{}'",
                key, message.key
            )));
        }
        Ok(snapshot)
    }

    #[instrument(skip(self, snapshot), fields(path = %self.path.display(), pending = snapshot.len()))]
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(snapshot)?;
        let temp_path = self.temp_path();

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(bytes = data.len(), "Snapshot saved");
        Ok(())
    }
}
