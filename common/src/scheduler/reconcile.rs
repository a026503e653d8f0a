// Reconciliation pass: drift detection plus store/timer set differences

use crate::models::Snapshot;
use crate::scheduler::timers::TimerSet;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one reconciliation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// All timers were discarded before diffing
    pub drift_reset: bool,
    /// Timers dropped because their key left the store (excludes drift reset)
    pub cancelled: usize,
    /// Timers created for keys that had none
    pub created: usize,
    /// Timers active after the tick
    pub active: usize,
}

/// Tick state: the wall-clock instant of the previous tick plus cadence.
#[derive(Debug, Clone)]
pub struct Reconciler {
    cadence: Duration,
    tolerance: Duration,
    last_tick: Option<DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(cadence: Duration, tolerance: Duration) -> Self {
        Self {
            cadence,
            tolerance,
            last_tick: None,
        }
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }

    /// True when the gap since the previous tick exceeds cadence + tolerance,
    /// or the wall clock stepped backwards. The first tick never drifts.
    pub fn is_drift(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_tick else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed > self.cadence + self.tolerance,
            Err(_) => true,
        }
    }

    /// Bring `timers` in line with `snapshot` as of `now`.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        snapshot: &Snapshot,
        timers: &mut TimerSet,
    ) -> TickReport {
        let mut report = TickReport::default();

        if self.is_drift(now) {
            let discarded = timers.cancel_all();
            warn!(
                last_tick = ?self.last_tick,
                now = %now,
                discarded_timers = discarded,
                "Tick drift detected, rebuilding all timers"
            );
            report.drift_reset = true;
        }

        // Keys with a timer but no longer in the store
        let stale: Vec<String> = timers
            .keys()
            .filter(|key| !snapshot.contains_key(*key))
            .map(str::to_string)
            .collect();
        for key in &stale {
            if timers.cancel(key) {
                debug!(key = %key, "Cancelled timer for removed message");
                report.cancelled += 1;
            }
        }

        // Keys in the store without a timer
        let missing: Vec<_> = snapshot
            .iter()
            .filter(|(key, _)| !timers.contains(key))
            .collect();
        for (key, message) in missing {
            let remaining = (message.due_at - now).to_std().unwrap_or(Duration::ZERO);
            let timer_id = timers.schedule(key.clone(), message.clone(), remaining);
            debug!(
                key = %key,
                timer_id,
                remaining_ms = remaining.as_millis() as u64,
                "Timer created"
            );
            report.created += 1;
        }

        self.last_tick = Some(now);
        report.active = timers.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueuedMessage;
    use crate::scheduler::timers::Expiry;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tokio::sync::mpsc;

    const CADENCE: Duration = Duration::from_millis(5000);
    const TOLERANCE: Duration = Duration::from_millis(100);

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn ms(n: i64) -> ChronoDuration {
        ChronoDuration::milliseconds(n)
    }

    fn snapshot(entries: &[(&str, DateTime<Utc>)]) -> Snapshot {
        entries
            .iter()
            .map(|(key, due_at)| {
                (
                    key.to_string(),
                    QueuedMessage {
                        key: key.to_string(),
                        title: None,
                        message: format!("body of {}", key),
                        due_at: *due_at,
                    },
                )
            })
            .collect()
    }

    fn setup() -> (Reconciler, TimerSet, mpsc::UnboundedReceiver<Expiry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Reconciler::new(CADENCE, TOLERANCE), TimerSet::new(tx), rx)
    }

    #[test]
    fn test_drift_threshold() {
        let mut reconciler = Reconciler::new(CADENCE, TOLERANCE);
        assert!(!reconciler.is_drift(t0()));

        reconciler.last_tick = Some(t0());
        assert!(!reconciler.is_drift(t0() + ms(5000)));
        assert!(!reconciler.is_drift(t0() + ms(5100)));
        assert!(reconciler.is_drift(t0() + ms(5101)));
        assert!(reconciler.is_drift(t0() - ms(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_creates_missing_timers() {
        let (mut reconciler, mut timers, _rx) = setup();
        let store = snapshot(&[("a", t0() + ms(10_000)), ("b", t0() + ms(20_000))]);

        let report = reconciler.tick(t0(), &store, &mut timers);

        assert_eq!(report.created, 2);
        assert_eq!(report.active, 2);
        assert!(!report.drift_reset);
        assert_eq!(reconciler.last_tick(), Some(t0()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_cancels_timers_for_removed_keys() {
        let (mut reconciler, mut timers, _rx) = setup();
        let full = snapshot(&[("a", t0() + ms(10_000)), ("b", t0() + ms(20_000))]);
        reconciler.tick(t0(), &full, &mut timers);

        let reduced = snapshot(&[("b", t0() + ms(20_000))]);
        let report = reconciler.tick(t0() + ms(5000), &reduced, &mut timers);

        assert_eq!(report.cancelled, 1);
        assert_eq!(report.created, 0);
        assert!(!timers.contains("a"));
        assert!(timers.contains("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_tick_keeps_existing_timers() {
        let (mut reconciler, mut timers, _rx) = setup();
        let store = snapshot(&[("a", t0() + ms(60_000))]);
        reconciler.tick(t0(), &store, &mut timers);
        let id = timers.timer_id("a");

        let report = reconciler.tick(t0() + ms(5050), &store, &mut timers);

        assert_eq!(report, TickReport { active: 1, ..TickReport::default() });
        assert_eq!(timers.timer_id("a"), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_rebuilds_one_timer_per_key() {
        let (mut reconciler, mut timers, _rx) = setup();
        let store = snapshot(&[("a", t0() + ms(60_000)), ("b", t0() + ms(90_000))]);
        reconciler.tick(t0(), &store, &mut timers);
        let old_a = timers.timer_id("a").unwrap();

        // Loop stalled for many missed ticks
        let report = reconciler.tick(t0() + ms(45_000), &store, &mut timers);

        assert!(report.drift_reset);
        assert_eq!(report.created, 2);
        assert_eq!(timers.len(), 2);
        assert_ne!(timers.timer_id("a").unwrap(), old_a);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_message_fires_immediately() {
        let (mut reconciler, mut timers, mut rx) = setup();
        let store = snapshot(&[("late", t0() - ms(5000))]);

        reconciler.tick(t0(), &store, &mut timers);
        let started = tokio::time::Instant::now();
        let expiry = rx.recv().await.unwrap();

        assert_eq!(expiry.key(), "late");
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(timers.claim(&expiry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_waits_remaining_interval() {
        let (mut reconciler, mut timers, mut rx) = setup();
        let store = snapshot(&[("a", t0() + ms(10_000))]);

        reconciler.tick(t0() + ms(4000), &store, &mut timers);
        let started = tokio::time::Instant::now();
        rx.recv().await.unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(6000));
        assert!(waited < Duration::from_millis(7000));
    }
}
