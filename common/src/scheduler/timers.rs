// Timer set: at most one live countdown per message key

use crate::models::QueuedMessage;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

pub type TimerId = u64;

/// Sent by a timer task when its countdown elapses.
///
/// Carries the message captured when the timer was created; the store is not
/// consulted again at fire time.
#[derive(Debug, Clone)]
pub struct Expiry {
    pub timer_id: TimerId,
    /// Store key the timer was scheduled under
    pub key: String,
    pub message: QueuedMessage,
}

impl Expiry {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Handle to one spawned countdown. Dropping it cancels the countdown.
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Idempotent: aborting a finished or already aborted task does nothing.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Key → active timer. Owned exclusively by the scheduler engine.
pub struct TimerSet {
    timers: HashMap<String, TimerHandle>,
    next_id: TimerId,
    expiry_tx: mpsc::UnboundedSender<Expiry>,
}

impl TimerSet {
    pub fn new(expiry_tx: mpsc::UnboundedSender<Expiry>) -> Self {
        Self {
            timers: HashMap::new(),
            next_id: 1,
            expiry_tx,
        }
    }

    /// Start a countdown for `message` under `key`, replacing any timer
    /// already held for that key. Must be called from within a tokio runtime.
    pub fn schedule(
        &mut self,
        key: impl Into<String>,
        message: QueuedMessage,
        delay: Duration,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        let key = key.into();
        let tx = self.expiry_tx.clone();
        let expiry_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The engine may already be gone during shutdown
            let _ = tx.send(Expiry {
                timer_id: id,
                key: expiry_key,
                message,
            });
        });

        trace!(key = %key, timer_id = id, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        if let Some(previous) = self.timers.insert(key, TimerHandle { id, task }) {
            previous.cancel();
        }
        id
    }

    /// Cancel and forget the timer for `key`. Returns whether one existed.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer. Returns how many were active.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, handle) in self.timers.drain() {
            handle.cancel();
        }
        count
    }

    /// Remove the entry an expiry belongs to, if it is still the current
    /// timer for that key. A stale expiry (its timer was cancelled or
    /// replaced after it elapsed) returns false and changes nothing.
    pub fn claim(&mut self, expiry: &Expiry) -> bool {
        match self.timers.get(expiry.key()) {
            Some(handle) if handle.id() == expiry.timer_id => {
                self.timers.remove(expiry.key());
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    pub fn timer_id(&self, key: &str) -> Option<TimerId> {
        self.timers.get(key).map(TimerHandle::id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.timers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
