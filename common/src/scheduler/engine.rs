// Scheduler engine: single task owning the store, the timer set, and the tick state

use crate::config::{LimitsConfig, Settings};
use crate::errors::{SchedulerError, ValidationError};
use crate::models::{CandidateBatch, QueuedMessage, Snapshot};
use crate::notifier::Notifier;
use crate::scheduler::reconcile::{Reconciler, TickReport};
use crate::scheduler::timers::{Expiry, TimerSet};
use crate::store::MessageStore;
use crate::telemetry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Instrument};

const COMMAND_BUFFER: usize = 256;

/// Runtime parameters for the scheduler engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reconciliation cadence
    pub tick_interval: Duration,
    /// Extra gap allowed between ticks before timers are rebuilt
    pub drift_tolerance: Duration,
    /// How long shutdown waits for in-flight deliveries
    pub shutdown_grace: Duration,
    pub limits: LimitsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(5000),
            drift_tolerance: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(2000),
            limits: LimitsConfig::default(),
        }
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            tick_interval: settings.scheduler.tick_interval(),
            drift_tolerance: settings.scheduler.drift_tolerance(),
            shutdown_grace: settings.scheduler.shutdown_grace(),
            limits: settings.limits,
        }
    }
}

enum Command {
    Upsert {
        batch: CandidateBatch,
        reply: oneshot::Sender<Result<usize, ValidationError>>,
    },
    Remove {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    Reconcile {
        reply: oneshot::Sender<TickReport>,
    },
}

/// Whatever woke the engine loop
enum Event {
    Tick,
    Command(Command),
    Expired(Expiry),
    Delivered(Result<(), JoinError>),
    Shutdown,
}

/// Cloneable front door to a running [`SchedulerEngine`].
///
/// Writes go through the engine so that a replaced key's timer is cancelled
/// in the same step as the store update. Reads come straight from the last
/// published snapshot.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerHandle {
    /// Validate and apply a batch. Returns the number of entries applied.
    pub async fn upsert(&self, batch: CandidateBatch) -> Result<usize, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Upsert { batch, reply }).await?;
        let accepted = rx.await.map_err(|_| SchedulerError::EngineStopped)??;
        Ok(accepted)
    }

    /// Delete a pending message and its timer. Returns whether it existed.
    pub async fn remove(&self, key: impl Into<String>) -> Result<bool, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove {
            key: key.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::EngineStopped)
    }

    /// Run a reconciliation tick now instead of waiting for the cadence.
    pub async fn reconcile_now(&self) -> Result<TickReport, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconcile { reply }).await?;
        rx.await.map_err(|_| SchedulerError::EngineStopped)
    }

    /// Current pending messages. Always a whole-batch state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    /// Ask the engine to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::EngineStopped)
    }
}

/// Owns all scheduling state and processes commands, ticks, and timer
/// expiries one at a time on a single task.
pub struct SchedulerEngine {
    config: EngineConfig,
    store: MessageStore,
    timers: TimerSet,
    reconciler: Reconciler,
    notifier: Arc<dyn Notifier>,
    commands: mpsc::Receiver<Command>,
    expiries: mpsc::UnboundedReceiver<Expiry>,
    shutdown_rx: broadcast::Receiver<()>,
    deliveries: JoinSet<()>,
}

impl SchedulerEngine {
    /// Create an engine seeded with `initial` (typically the persisted
    /// snapshot) and the handle used to drive it.
    pub fn new(
        config: EngineConfig,
        initial: Snapshot,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (expiry_tx, expiries) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let store = MessageStore::new(initial, config.limits);
        let handle = SchedulerHandle {
            commands: command_tx,
            snapshots: store.subscribe(),
            shutdown_tx,
        };

        let engine = Self {
            reconciler: Reconciler::new(config.tick_interval, config.drift_tolerance),
            timers: TimerSet::new(expiry_tx),
            config,
            store,
            notifier,
            commands,
            expiries,
            shutdown_rx,
            deliveries: JoinSet::new(),
        };

        (engine, handle)
    }

    /// Run until shutdown is requested or every handle is dropped.
    ///
    /// The first tick happens immediately, so a restored snapshot gets its
    /// timers right away.
    pub async fn run(mut self) {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            drift_tolerance_ms = self.config.drift_tolerance.as_millis() as u64,
            pending = self.store.len(),
            "Starting scheduler engine"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = ticker.tick() => Event::Tick,
                Some(command) = self.commands.recv() => Event::Command(command),
                Some(expiry) = self.expiries.recv() => Event::Expired(expiry),
                Some(result) = self.deliveries.join_next() => Event::Delivered(result),
                _ = self.shutdown_rx.recv() => Event::Shutdown,
            };

            match event {
                Event::Tick => {
                    self.reconcile();
                }
                Event::Command(command) => self.handle_command(command),
                Event::Expired(expiry) => self.handle_expiry(expiry),
                Event::Delivered(Err(e)) if !e.is_cancelled() => {
                    error!(error = %e, "Delivery task panicked");
                }
                Event::Delivered(_) => {}
                Event::Shutdown => {
                    info!("Shutdown signal received, stopping scheduler engine");
                    break;
                }
            }
        }

        self.drain().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Upsert { batch, reply } => {
                let _ = reply.send(self.upsert(batch));
            }
            Command::Remove { key, reply } => {
                let _ = reply.send(self.remove(&key));
            }
            Command::Reconcile { reply } => {
                let _ = reply.send(self.reconcile());
            }
        }
    }

    /// Validate against one reference time, cancel timers for every touched
    /// key, then apply. The next tick creates the replacement timers.
    #[instrument(skip(self, batch), fields(entries = batch.len()))]
    fn upsert(&mut self, batch: CandidateBatch) -> Result<usize, ValidationError> {
        let validated = match self.store.prepare(batch, Utc::now()) {
            Ok(validated) => validated,
            Err(e) => {
                warn!(error = %e, key = e.key(), "Rejected ingest batch");
                telemetry::record_ingest_rejected();
                return Err(e);
            }
        };

        for key in validated.keys() {
            if self.timers.cancel(key) {
                debug!(key = %key, "Cancelled timer for replaced message");
            }
        }

        let accepted = self.store.apply(validated);
        telemetry::record_ingest(accepted);
        info!(accepted, pending = self.store.len(), "Ingest batch applied");
        Ok(accepted)
    }

    #[instrument(skip(self))]
    fn remove(&mut self, key: &str) -> bool {
        self.timers.cancel(key);
        let removed = self.store.remove(key).is_some();
        if removed {
            info!(pending = self.store.len(), "Message removed");
        }
        removed
    }

    fn reconcile(&mut self) -> TickReport {
        let snapshot = self.store.snapshot();
        let report = self
            .reconciler
            .tick(Utc::now(), &snapshot, &mut self.timers);

        if report.drift_reset {
            telemetry::record_drift_reset();
        }
        telemetry::update_scheduler_gauges(self.store.len(), report.active);

        if report.created > 0 || report.cancelled > 0 || report.drift_reset {
            info!(
                created = report.created,
                cancelled = report.cancelled,
                active = report.active,
                drift_reset = report.drift_reset,
                "Reconciliation tick"
            );
        } else {
            debug!(active = report.active, "Reconciliation tick, nothing to do");
        }
        report
    }

    /// Deliver the message captured by the timer, and drop the key from the
    /// store whatever the delivery outcome.
    fn handle_expiry(&mut self, expiry: Expiry) {
        if !self.timers.claim(&expiry) {
            debug!(
                key = %expiry.key(),
                timer_id = expiry.timer_id,
                "Discarding expiry from a superseded timer"
            );
            return;
        }

        let Expiry {
            timer_id,
            key,
            message,
        } = expiry;
        self.store.remove(&key);

        let span = tracing::info_span!("deliver", key = %key, timer_id);
        let notifier = self.notifier.clone();
        self.deliveries
            .spawn(async move { deliver(notifier.as_ref(), &message).await }.instrument(span));
    }

    async fn drain(mut self) {
        let cancelled = self.timers.cancel_all();
        let in_flight = self.deliveries.len();
        info!(
            cancelled_timers = cancelled,
            in_flight_deliveries = in_flight,
            pending = self.store.len(),
            "Stopping scheduler engine"
        );

        let grace = self.config.shutdown_grace;
        let deliveries = &mut self.deliveries;
        let finished =
            tokio::time::timeout(grace, async { while deliveries.join_next().await.is_some() {} })
                .await;
        if finished.is_err() {
            warn!(
                remaining = self.deliveries.len(),
                grace_ms = grace.as_millis() as u64,
                "Aborting deliveries still running after shutdown grace"
            );
            self.deliveries.abort_all();
        }

        info!("Scheduler engine stopped");
    }
}

async fn deliver(notifier: &dyn Notifier, message: &QueuedMessage) {
    match notifier.deliver(message).await {
        Ok(()) => {
            info!("Message delivered");
            telemetry::record_delivery(true);
        }
        Err(e) => {
            error!(error = %e, "Message delivery failed, message dropped");
            telemetry::record_delivery(false);
        }
    }
}
