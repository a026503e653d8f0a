use std::sync::Arc;

use common::config::Settings;
use common::scheduler::SchedulerHandle;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerHandle,
    pub config: Arc<Settings>,
    /// Absent when no recorder was installed (tests)
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(scheduler: SchedulerHandle, config: Settings) -> Self {
        Self {
            scheduler,
            config: Arc::new(config),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PrometheusHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
