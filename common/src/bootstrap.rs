// Bootstrap utilities for binary initialization
// Purpose: wire storage, notifier, engine, and snapshot writer from Settings

use crate::config::{NotifierConfig, NotifierKind, Settings};
use crate::notifier::{HttpNotifier, LogNotifier, Notifier, RetryingNotifier};
use crate::retry::ExponentialBackoff;
use crate::scheduler::{EngineConfig, SchedulerEngine, SchedulerHandle};
use crate::storage::{load_or_empty, JsonFileStorage, SnapshotStorage, SnapshotWriter};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const RETRY_JITTER: f64 = 0.1;

/// Initialize snapshot storage
/// Used by: API server
#[tracing::instrument(skip(settings))]
pub fn init_storage(settings: &Settings) -> Arc<dyn SnapshotStorage> {
    let storage = JsonFileStorage::new(&settings.storage.path);
    info!(path = %storage.path().display(), "Snapshot storage initialized");
    Arc::new(storage)
}

/// Initialize the outbound notifier, wrapped in retries when configured
///
/// # Errors
/// Returns error if the HTTP notifier is selected without credentials or its
/// client cannot be built
#[tracing::instrument(skip(settings))]
pub fn init_notifier(settings: &Settings) -> Result<Arc<dyn Notifier>> {
    let config = &settings.notifier;
    let notifier = match config.kind {
        NotifierKind::Log => {
            info!("Using log notifier");
            with_retries(LogNotifier, config)
        }
        NotifierKind::Http => {
            let token = config
                .token
                .as_deref()
                .context("notifier.token is required for the http notifier")?;
            let user = config
                .user
                .as_deref()
                .context("notifier.user is required for the http notifier")?;
            let http = HttpNotifier::new(&config.api_url, token, user, config.timeout_seconds)
                .context("Failed to initialize HTTP notifier")?;
            info!(api_url = %config.api_url, "Using HTTP notifier");
            with_retries(http, config)
        }
    };
    Ok(notifier)
}

fn with_retries<N>(inner: N, config: &NotifierConfig) -> Arc<dyn Notifier>
where
    N: Notifier + 'static,
{
    if config.max_retries == 0 {
        return Arc::new(inner);
    }

    info!(
        max_retries = config.max_retries,
        base_delay_ms = config.retry_base_delay_ms,
        "Delivery retries enabled"
    );
    let strategy = ExponentialBackoff::with_config(
        config.retry_base_delay_ms,
        config.retry_max_delay_ms,
        RETRY_JITTER,
        config.max_retries,
    );
    Arc::new(RetryingNotifier::new(inner, strategy))
}

/// A started scheduler engine and its snapshot writer
pub struct RunningScheduler {
    pub handle: SchedulerHandle,
    engine_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RunningScheduler {
    /// Stop the engine, then let the writer flush the final snapshot.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        let RunningScheduler {
            handle,
            engine_task,
            writer_task,
        } = self;
        // The writer ends once the engine (and its store) is gone
        drop(handle);

        if let Err(e) = engine_task.await {
            warn!(error = %e, "Scheduler engine task ended abnormally");
        }
        if let Err(e) = writer_task.await {
            warn!(error = %e, "Snapshot writer task ended abnormally");
        }
        info!("Scheduler stopped");
    }
}

/// Load persisted messages and start the engine plus snapshot writer
/// Used by: API server, integration tests
#[tracing::instrument(skip_all)]
pub async fn start_scheduler(
    config: EngineConfig,
    storage: Arc<dyn SnapshotStorage>,
    notifier: Arc<dyn Notifier>,
) -> RunningScheduler {
    let initial = load_or_empty(storage.as_ref()).await;
    let (engine, handle) = SchedulerEngine::new(config, initial, notifier);

    // Subscribe before the engine can publish anything
    let writer_task = SnapshotWriter::spawn(storage, handle.subscribe());
    let engine_task = tokio::spawn(engine.run());

    info!("Scheduler started");
    RunningScheduler {
        handle,
        engine_task,
        writer_task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateBatch, MessageCandidate, QueuedMessage, Snapshot};
    use crate::storage::MemoryStorage;
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_init_notifier_requires_http_credentials() {
        let mut settings = Settings::default();
        settings.notifier.kind = NotifierKind::Http;
        assert!(init_notifier(&settings).is_err());

        settings.notifier.token = Some("t".to_string());
        settings.notifier.user = Some("u".to_string());
        assert!(init_notifier(&settings).is_ok());
    }

    #[test]
    fn test_init_notifier_defaults_to_log() {
        let settings = Settings::default();
        assert!(init_notifier(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_latest_snapshot() {
        let existing = QueuedMessage {
            key: "old".to_string(),
            title: None,
            message: "restored".to_string(),
            due_at: Utc::now() + ChronoDuration::hours(1),
        };
        let storage = Arc::new(MemoryStorage::with_snapshot(Snapshot::from([(
            "old".to_string(),
            existing,
        )])));
        let running = start_scheduler(
            EngineConfig::default(),
            storage.clone(),
            Arc::new(LogNotifier),
        )
        .await;
        assert!(running.handle.snapshot().contains_key("old"));

        let batch = CandidateBatch::from([(
            "new".to_string(),
            MessageCandidate::new("later", Utc::now() + ChronoDuration::hours(2)),
        )]);
        running.handle.upsert(batch).await.unwrap();
        running.shutdown().await;

        let stored = storage.stored().unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["new", "old"]);
    }
}
