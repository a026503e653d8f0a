// Scheduler: reconciles pending messages against live countdown timers

pub mod engine;
pub mod reconcile;
pub mod timers;

pub use engine::{EngineConfig, SchedulerEngine, SchedulerHandle};
pub use reconcile::{Reconciler, TickReport};
pub use timers::{Expiry, TimerId, TimerSet};
