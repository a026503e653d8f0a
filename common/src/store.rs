// Message store: validated, all-or-nothing mapping of pending messages

use crate::config::LimitsConfig;
use crate::errors::ValidationError;
use crate::models::{CandidateBatch, MessageCandidate, QueuedMessage, Snapshot};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// A batch that passed validation and is ready to be applied.
///
/// Produced only by [`MessageStore::prepare`], so holding one proves every
/// entry was checked against the same reference time.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    messages: Vec<QueuedMessage>,
}

impl ValidatedBatch {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// In-memory source of truth for pending messages.
///
/// Every mutation publishes a fresh snapshot on a watch channel. Readers and
/// the snapshot writer only ever observe whole batches.
pub struct MessageStore {
    entries: Arc<Snapshot>,
    limits: LimitsConfig,
    publisher: watch::Sender<Arc<Snapshot>>,
}

impl MessageStore {
    /// Seed the store with previously persisted entries.
    ///
    /// Each entry's embedded key is taken from its map key, and entries that
    /// break the field limits are dropped. Due times are not checked, so
    /// overdue entries survive and fire on the first tick.
    pub fn new(initial: Snapshot, limits: LimitsConfig) -> Self {
        let entries = Arc::new(restorable(initial, &limits));
        let (publisher, _) = watch::channel(entries.clone());
        Self {
            entries,
            limits,
            publisher,
        }
    }

    /// Cheap read-only copy of the current state
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.entries.clone()
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.publisher.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&QueuedMessage> {
        self.entries.get(key)
    }

    /// Validate a whole batch against `now`. Nothing is mutated.
    pub fn prepare(
        &self,
        batch: CandidateBatch,
        now: DateTime<Utc>,
    ) -> Result<ValidatedBatch, ValidationError> {
        let messages = batch
            .into_iter()
            .map(|(key, candidate)| validate_candidate(key, candidate, &self.limits, now))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ValidatedBatch { messages })
    }

    /// Replace or insert every entry of a validated batch, then publish.
    ///
    /// Callers holding timers for these keys must cancel them before calling
    /// this, in the same step.
    pub fn apply(&mut self, batch: ValidatedBatch) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        let entries = Arc::make_mut(&mut self.entries);
        for message in batch.messages {
            entries.insert(message.key.clone(), message);
        }
        self.publish();
        count
    }

    /// Delete an entry. Absent keys are a no-op and publish nothing.
    pub fn remove(&mut self, key: &str) -> Option<QueuedMessage> {
        if !self.entries.contains_key(key) {
            return None;
        }
        let removed = Arc::make_mut(&mut self.entries).remove(key);
        self.publish();
        removed
    }

    fn publish(&self) {
        debug!(pending = self.entries.len(), "Publishing store snapshot");
        self.publisher.send_replace(self.entries.clone());
    }
}

fn restorable(initial: Snapshot, limits: &LimitsConfig) -> Snapshot {
    initial
        .into_iter()
        .filter_map(|(key, mut message)| {
            if message.key != key {
                warn!(key = %key, embedded_key = %message.key, "Restored entry key mismatch, using map key");
                message.key = key.clone();
            }
            match check_lengths(&message, limits) {
                Ok(()) => Some((key, message)),
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "Dropping restored entry");
                    None
                }
            }
        })
        .collect()
}

fn check_lengths(message: &QueuedMessage, limits: &LimitsConfig) -> Result<(), String> {
    let key_len = message.key.chars().count();
    if key_len == 0 || key_len > limits.key_max_len {
        return Err(format!("key must be between 1 and {} characters", limits.key_max_len));
    }
    if let Some(title) = &message.title {
        if title.chars().count() > limits.title_max_len {
            return Err(format!("title must be at most {} characters", limits.title_max_len));
        }
    }
    let message_len = message.message.chars().count();
    if message_len == 0 || message_len > limits.message_max_len {
        return Err(format!(
            "message must be between 1 and {} characters",
            limits.message_max_len
        ));
    }
    Ok(())
}

fn validate_candidate(
    key: String,
    candidate: MessageCandidate,
    limits: &LimitsConfig,
    now: DateTime<Utc>,
) -> Result<QueuedMessage, ValidationError> {
    let key_len = key.chars().count();
    if key_len == 0 || key_len > limits.key_max_len {
        return Err(ValidationError::InvalidKeyLength {
            key,
            max: limits.key_max_len,
        });
    }

    if let Some(title) = &candidate.title {
        if title.chars().count() > limits.title_max_len {
            return Err(ValidationError::InvalidFieldValue {
                key,
                field: "title".to_string(),
                reason: format!("must be at most {} characters", limits.title_max_len),
            });
        }
    }

    let message = match candidate.message {
        Some(message) => message,
        None => {
            return Err(ValidationError::MissingField {
                key,
                field: "message".to_string(),
            })
        }
    };
    let message_len = message.chars().count();
    if message_len == 0 || message_len > limits.message_max_len {
        return Err(ValidationError::InvalidFieldValue {
            key,
            field: "message".to_string(),
            reason: format!(
                "must be between 1 and {} characters",
                limits.message_max_len
            ),
        });
    }

    let Some(raw_timestamp) = candidate.timestamp else {
        return Err(ValidationError::MissingField {
            key,
            field: "timestamp".to_string(),
        });
    };
    let due_at = match parse_timestamp(&raw_timestamp) {
        Ok(due_at) => due_at,
        Err(reason) => {
            return Err(ValidationError::InvalidFieldValue {
                key,
                field: "timestamp".to_string(),
                reason,
            })
        }
    };
    if due_at <= now {
        return Err(ValidationError::NotInFuture { key, due_at });
    }

    Ok(QueuedMessage {
        key,
        title: candidate.title,
        message,
        due_at,
    })
}

/// Epoch milliseconds, as a JSON number or a numeric string.
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    let millis = match value {
        Value::Number(number) => match number.as_i64() {
            Some(millis) => millis,
            None => number
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
                .ok_or_else(|| format!("'{}' is not a whole number of milliseconds", number))?,
        },
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not numeric", text))?,
        other => return Err(format!("expected epoch milliseconds, got {}", other)),
    };

    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| format!("{} is out of range", millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn candidate(message: &str, in_ms: i64) -> MessageCandidate {
        MessageCandidate::new(message, now() + ChronoDuration::milliseconds(in_ms))
    }

    fn batch(entries: Vec<(&str, MessageCandidate)>) -> CandidateBatch {
        entries
            .into_iter()
            .map(|(k, c)| (k.to_string(), c))
            .collect()
    }

    fn store() -> MessageStore {
        MessageStore::new(Snapshot::new(), LimitsConfig::default())
    }

    impl MessageStore {
        fn upsert(
            &mut self,
            batch: CandidateBatch,
            now: DateTime<Utc>,
        ) -> Result<usize, ValidationError> {
            let validated = self.prepare(batch, now)?;
            Ok(self.apply(validated))
        }
    }

    fn stored(key: &str, message: &str, due_at: DateTime<Utc>) -> QueuedMessage {
        QueuedMessage {
            key: key.to_string(),
            title: None,
            message: message.to_string(),
            due_at,
        }
    }

    #[test]
    fn test_restore_takes_key_from_map() {
        let initial = Snapshot::from([("x".to_string(), stored("y", "hi", now()))]);
        let store = MessageStore::new(initial, LimitsConfig::default());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("x").unwrap().key, "x");
        assert!(store.get("y").is_none());
    }

    #[test]
    fn test_restore_drops_entries_over_limits() {
        let long_key = "k".repeat(65);
        let initial = Snapshot::from([
            ("ok".to_string(), stored("ok", "fine", now())),
            (long_key.clone(), stored(&long_key, "fine", now())),
            ("long".to_string(), stored("long", &"x".repeat(1025), now())),
            ("empty".to_string(), stored("empty", "", now())),
        ]);
        let store = MessageStore::new(initial, LimitsConfig::default());

        assert_eq!(store.snapshot().keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[test]
    fn test_restore_keeps_overdue_entries() {
        let overdue = now() - ChronoDuration::hours(1);
        let initial = Snapshot::from([("late".to_string(), stored("late", "hi", overdue))]);
        let store = MessageStore::new(initial, LimitsConfig::default());

        assert_eq!(store.get("late").unwrap().due_at, overdue);
    }

    #[test]
    fn test_upsert_inserts_valid_entries() {
        let mut store = store();
        let applied = store
            .upsert(batch(vec![("a", candidate("hi", 10_000))]), now())
            .unwrap();

        assert_eq!(applied, 1);
        let entry = store.get("a").unwrap();
        assert_eq!(entry.message, "hi");
        assert_eq!(entry.due_at, now() + ChronoDuration::milliseconds(10_000));
    }

    #[test]
    fn test_upsert_replaces_existing_key() {
        let mut store = store();
        store
            .upsert(batch(vec![("a", candidate("first", 10_000))]), now())
            .unwrap();
        store
            .upsert(
                batch(vec![("a", candidate("second", 20_000).with_title("t"))]),
                now(),
            )
            .unwrap();

        assert_eq!(store.len(), 1);
        let entry = store.get("a").unwrap();
        assert_eq!(entry.message, "second");
        assert_eq!(entry.title.as_deref(), Some("t"));
    }

    #[test]
    fn test_one_invalid_entry_rejects_whole_batch() {
        let mut store = store();
        store
            .upsert(batch(vec![("keep", candidate("old", 5_000))]), now())
            .unwrap();

        let result = store.upsert(
            batch(vec![
                ("keep", candidate("new", 5_000)),
                ("good", candidate("fine", 5_000)),
                ("bad", candidate("late", -1)),
            ]),
            now(),
        );

        assert!(matches!(result, Err(ValidationError::NotInFuture { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("keep").unwrap().message, "old");
    }

    #[test]
    fn test_message_of_1025_chars_is_rejected() {
        let mut store = store();
        let long = "x".repeat(1025);
        let result = store.upsert(batch(vec![("a", candidate(&long, 10_000))]), now());

        match result {
            Err(ValidationError::InvalidFieldValue { key, field, .. }) => {
                assert_eq!(key, "a");
                assert_eq!(field, "message");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_length_limits_count_characters() {
        let mut store = store();
        let key = "é".repeat(64);
        let message = "ü".repeat(1024);
        let title = "ß".repeat(250);
        let result = store.upsert(
            batch(vec![(key.as_str(), candidate(&message, 1_000).with_title(title))]),
            now(),
        );
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn test_key_length_bounds() {
        let store = store();
        let too_long = "k".repeat(65);
        assert!(matches!(
            store.prepare(batch(vec![("", candidate("hi", 1_000))]), now()),
            Err(ValidationError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            store.prepare(batch(vec![(too_long.as_str(), candidate("hi", 1_000))]), now()),
            Err(ValidationError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_title_over_limit_is_rejected() {
        let store = store();
        let result = store.prepare(
            batch(vec![("a", candidate("hi", 1_000).with_title("t".repeat(251)))]),
            now(),
        );
        assert!(matches!(
            result,
            Err(ValidationError::InvalidFieldValue { ref field, .. }) if field == "title"
        ));
    }

    #[test]
    fn test_empty_and_missing_message() {
        let store = store();
        assert!(matches!(
            store.prepare(batch(vec![("a", candidate("", 1_000))]), now()),
            Err(ValidationError::InvalidFieldValue { .. })
        ));

        let missing = MessageCandidate {
            message: None,
            ..candidate("x", 1_000)
        };
        assert!(matches!(
            store.prepare(batch(vec![("a", missing)]), now()),
            Err(ValidationError::MissingField { ref field, .. }) if field == "message"
        ));
    }

    #[test]
    fn test_timestamp_formats() {
        let store = store();
        let due = (now() + ChronoDuration::seconds(5)).timestamp_millis();

        let as_string = MessageCandidate {
            timestamp: Some(Value::String(due.to_string())),
            ..candidate("hi", 0)
        };
        let validated = store
            .prepare(batch(vec![("a", as_string)]), now())
            .unwrap();
        assert_eq!(validated.len(), 1);

        let not_numeric = MessageCandidate {
            timestamp: Some(Value::String("tomorrow".to_string())),
            ..candidate("hi", 0)
        };
        assert!(matches!(
            store.prepare(batch(vec![("a", not_numeric)]), now()),
            Err(ValidationError::InvalidFieldValue { ref field, .. }) if field == "timestamp"
        ));

        let boolean = MessageCandidate {
            timestamp: Some(Value::Bool(true)),
            ..candidate("hi", 0)
        };
        assert!(store.prepare(batch(vec![("a", boolean)]), now()).is_err());

        let missing = MessageCandidate {
            timestamp: None,
            ..candidate("hi", 0)
        };
        assert!(matches!(
            store.prepare(batch(vec![("a", missing)]), now()),
            Err(ValidationError::MissingField { ref field, .. }) if field == "timestamp"
        ));
    }

    #[test]
    fn test_due_time_must_be_strictly_future() {
        let store = store();
        assert!(matches!(
            store.prepare(batch(vec![("a", candidate("hi", 0))]), now()),
            Err(ValidationError::NotInFuture { .. })
        ));
        assert!(store
            .prepare(batch(vec![("a", candidate("hi", 1))]), now())
            .is_ok());
    }

    #[test]
    fn test_remove_is_noop_for_absent_key() {
        let mut store = store();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        assert!(store.remove("missing").is_none());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_mutations_publish_whole_snapshots() {
        let mut store = store();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store
            .upsert(
                batch(vec![
                    ("a", candidate("one", 1_000)),
                    ("b", candidate("two", 2_000)),
                ]),
                now(),
            )
            .unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 2);

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.message, "one");
        assert_eq!(rx.borrow_and_update().keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutations() {
        let mut store = store();
        store
            .upsert(batch(vec![("a", candidate("one", 1_000))]), now())
            .unwrap();
        let before = store.snapshot();
        store.remove("a");

        assert_eq!(before.len(), 1);
        assert!(store.snapshot().is_empty());
    }
}
