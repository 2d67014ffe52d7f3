//! Durable, ordered queue of pending operations.
//!
//! The queue is persisted as a single JSON array under one backend key and
//! rewritten whole on every change. Two companion keys hold the retry
//! ledger (operation id → [`RetryState`]) and the dead-letter list.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::operation::{DeadLetter, EntityKind, OperationId, QueuedOperation, RetryState, Verb};
use chrono::{DateTime, Utc};
use ledgersync_storage::KeyValueBackend;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to an operation after a retryable failure was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// The operation stays queued and becomes due again at `next_attempt_at`.
    Retry {
        /// Failed attempts so far.
        attempts: u32,
        /// Earliest time of the next attempt.
        next_attempt_at: DateTime<Utc>,
    },
    /// The retry budget is spent; the operation moved to the dead letters.
    DeadLettered {
        /// Failed attempts in total.
        attempts: u32,
    },
}

/// The persisted queue of operations awaiting confirmation.
///
/// All read-modify-write cycles are serialized by an internal lock, so an
/// enqueue racing a sync pass cannot lose either side's change.
pub struct SyncQueue {
    backend: Arc<dyn KeyValueBackend>,
    queue_key: String,
    retry_key: String,
    dead_letter_key: String,
    write_lock: Mutex<()>,
}

impl SyncQueue {
    /// Creates a queue over `backend` using the keys from `config`.
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: &SyncConfig) -> Self {
        Self {
            backend,
            queue_key: config.queue_key.clone(),
            retry_key: config.retry_key.clone(),
            dead_letter_key: config.dead_letter_key.clone(),
            write_lock: Mutex::new(()),
        }
    }

    /// Appends a new operation to the end of the queue and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored queue cannot be read or the new queue
    /// cannot be written. Nothing is changed in that case.
    pub fn enqueue(
        &self,
        verb: Verb,
        entity_kind: EntityKind,
        payload: Value,
    ) -> SyncResult<QueuedOperation> {
        let _guard = self.write_lock.lock();
        let mut operations = self.load_operations()?;

        let now = Utc::now();
        let enqueued_at = operations
            .last()
            .map_or(now, |last| last.enqueued_at.max(now));

        let operation = QueuedOperation::new(verb, entity_kind, payload, enqueued_at);
        operations.push(operation.clone());
        self.store(&self.queue_key, &operations)?;

        debug!(
            op_id = %operation.id,
            kind = %entity_kind,
            verb = %verb,
            pending = operations.len(),
            "operation queued"
        );
        Ok(operation)
    }

    /// Returns a copy of the queue in enqueue order.
    ///
    /// An unreadable queue is logged and reads as empty.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.load_operations().unwrap_or_else(|e| {
            warn!(key = %self.queue_key, error = %e, "sync queue unreadable");
            Vec::new()
        })
    }

    /// Returns the number of pending operations.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the given operations, keeping the rest in their original
    /// order. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written. Failing to
    /// prune the retry ledger afterwards is only logged.
    pub fn remove_by_ids(&self, ids: &HashSet<OperationId>) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock();
        let operations = self.load_operations()?;
        let before = operations.len();
        let remaining: Vec<_> = operations
            .into_iter()
            .filter(|op| !ids.contains(&op.id))
            .collect();
        let removed = before - remaining.len();

        if removed > 0 {
            self.store(&self.queue_key, &remaining)?;
        }
        // A stale ledger entry is never read once its operation is gone.
        if let Err(e) = self.forget_retry_states(ids) {
            warn!(key = %self.retry_key, error = %e, "retry ledger not pruned");
        }
        Ok(removed)
    }

    /// Returns the retry state of an operation, if it has failed before.
    pub fn retry_state(&self, id: &OperationId) -> Option<RetryState> {
        self.retry_states().remove(id)
    }

    /// Returns the retry state of every operation that has failed before.
    pub fn retry_states(&self) -> BTreeMap<OperationId, RetryState> {
        self.load_or_default(&self.retry_key).unwrap_or_else(|e| {
            warn!(key = %self.retry_key, error = %e, "retry ledger unreadable");
            BTreeMap::new()
        })
    }

    /// Records a retryable failure of `operation`.
    ///
    /// Once the attempt count reaches `retry.max_attempts` the operation is
    /// moved to the dead letters; otherwise its next attempt is pushed back
    /// by the backoff delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger or queue cannot be persisted.
    pub fn record_failure(
        &self,
        operation: &QueuedOperation,
        error: &SyncError,
        retry: &RetryConfig,
        now: DateTime<Utc>,
    ) -> SyncResult<FailureOutcome> {
        let _guard = self.write_lock.lock();
        let mut states: BTreeMap<OperationId, RetryState> = self.load_or_default(&self.retry_key)?;
        let attempts = states.get(&operation.id).map_or(0, |s| s.attempts) + 1;

        if attempts >= retry.max_attempts {
            states.remove(&operation.id);
            self.move_to_dead_letters(operation, attempts, error.to_string(), now)?;
            self.store(&self.retry_key, &states)?;
            return Ok(FailureOutcome::DeadLettered { attempts });
        }

        let delay = chrono::Duration::from_std(retry.delay_for_attempt(attempts))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let next_attempt_at = now + delay;
        states.insert(
            operation.id,
            RetryState {
                attempts,
                last_error: error.to_string(),
                next_attempt_at,
            },
        );
        self.store(&self.retry_key, &states)?;

        Ok(FailureOutcome::Retry {
            attempts,
            next_attempt_at,
        })
    }

    /// Moves `operation` out of the queue into the dead letters.
    ///
    /// # Errors
    ///
    /// Returns an error if the dead letters or queue cannot be persisted.
    pub fn dead_letter(&self, operation: &QueuedOperation, reason: impl Into<String>) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        let mut states: BTreeMap<OperationId, RetryState> = self.load_or_default(&self.retry_key)?;
        let attempts = states.remove(&operation.id).map_or(0, |s| s.attempts) + 1;

        self.move_to_dead_letters(operation, attempts, reason.into(), Utc::now())?;
        self.store(&self.retry_key, &states)
    }

    /// Returns every dead-lettered operation, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.load_or_default(&self.dead_letter_key).unwrap_or_else(|e| {
            warn!(key = %self.dead_letter_key, error = %e, "dead letters unreadable");
            Vec::new()
        })
    }

    /// Queues every dead letter again as a fresh operation at the end of
    /// the queue and clears the dead letters. Returns how many were queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue or dead letters cannot be persisted.
    pub fn requeue_dead_letters(&self) -> SyncResult<usize> {
        let _guard = self.write_lock.lock();
        let letters: Vec<DeadLetter> = self.load_or_default(&self.dead_letter_key)?;
        if letters.is_empty() {
            return Ok(0);
        }

        let mut operations = self.load_operations()?;

        // Cleared before the queue grows, so a crash in between can never
        // leave the same letters to be requeued twice.
        self.store(&self.dead_letter_key, &Vec::<DeadLetter>::new())?;

        let now = Utc::now();
        let mut enqueued_at = operations.last().map_or(now, |last| last.enqueued_at.max(now));
        for letter in &letters {
            let op = letter.operation.clone();
            let fresh = QueuedOperation::new(op.verb, op.entity_kind, op.payload, enqueued_at);
            debug!(old_id = %op.id, new_id = %fresh.id, "dead letter requeued");
            enqueued_at = fresh.enqueued_at;
            operations.push(fresh);
        }

        if let Err(e) = self.store(&self.queue_key, &operations) {
            if let Err(restore) = self.store(&self.dead_letter_key, &letters) {
                warn!(count = letters.len(), error = %restore, "dead letters lost");
            }
            return Err(e);
        }
        Ok(letters.len())
    }

    /// Drops every dead letter. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the dead letters cannot be persisted.
    pub fn discard_dead_letters(&self) -> SyncResult<usize> {
        let _guard = self.write_lock.lock();
        let letters: Vec<DeadLetter> = self.load_or_default(&self.dead_letter_key)?;
        if !letters.is_empty() {
            self.store(&self.dead_letter_key, &Vec::<DeadLetter>::new())?;
        }
        Ok(letters.len())
    }

    // Caller holds the write lock.
    fn move_to_dead_letters(
        &self,
        operation: &QueuedOperation,
        attempts: u32,
        reason: String,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut letters: Vec<DeadLetter> = self.load_or_default(&self.dead_letter_key)?;
        letters.push(DeadLetter {
            operation: operation.clone(),
            attempts,
            reason,
            dead_lettered_at: now,
        });
        // Written before the queue entry is dropped: a crash in between
        // duplicates the operation rather than losing it.
        self.store(&self.dead_letter_key, &letters)?;

        let remaining: Vec<_> = self
            .load_operations()?
            .into_iter()
            .filter(|op| op.id != operation.id)
            .collect();
        self.store(&self.queue_key, &remaining)
    }

    // Caller holds the write lock.
    fn forget_retry_states(&self, ids: &HashSet<OperationId>) -> SyncResult<()> {
        let mut states: BTreeMap<OperationId, RetryState> = self.load_or_default(&self.retry_key)?;
        let before = states.len();
        states.retain(|id, _| !ids.contains(id));
        if states.len() != before {
            self.store(&self.retry_key, &states)?;
        }
        Ok(())
    }

    fn load_operations(&self) -> SyncResult<Vec<QueuedOperation>> {
        self.load_or_default(&self.queue_key)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> SyncResult<T> {
        match self.backend.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(T::default()),
        }
    }

    fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.put(key, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_storage::{InMemoryBackend, StorageError};
    use serde_json::json;

    fn queue() -> (Arc<InMemoryBackend>, SyncQueue) {
        let backend = Arc::new(InMemoryBackend::new());
        let queue = SyncQueue::new(backend.clone(), &SyncConfig::default());
        (backend, queue)
    }

    fn ids(ops: &[QueuedOperation]) -> Vec<OperationId> {
        ops.iter().map(|op| op.id).collect()
    }

    #[test]
    fn enqueue_appends_in_order() {
        let (_, queue) = queue();
        let a = queue.enqueue(Verb::Create, EntityKind::Product, json!({"id": "p1"})).unwrap();
        let b = queue.enqueue(Verb::Update, EntityKind::Product, json!({"id": "p1"})).unwrap();
        let c = queue.enqueue(Verb::Create, EntityKind::Sale, json!({"id": "s1"})).unwrap();

        assert_eq!(ids(&queue.snapshot()), vec![a.id, b.id, c.id]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn enqueued_at_never_decreases() {
        let (_, queue) = queue();
        for i in 0..20 {
            queue.enqueue(Verb::Create, EntityKind::Expense, json!({"id": i})).unwrap();
        }
        let snapshot = queue.snapshot();
        assert!(snapshot.windows(2).all(|w| w[0].enqueued_at <= w[1].enqueued_at));
    }

    #[test]
    fn queue_is_persisted_as_json_array() {
        let (backend, queue) = queue();
        queue.enqueue(Verb::Delete, EntityKind::Customer, json!({"id": "c9"})).unwrap();

        let raw = backend.get("sync_queue").unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["entityKind"], "customer");
    }

    #[test]
    fn remove_by_ids_keeps_relative_order() {
        let (_, queue) = queue();
        let ops: Vec<_> = (0..5)
            .map(|i| queue.enqueue(Verb::Create, EntityKind::Product, json!({"id": i})).unwrap())
            .collect();

        let remove: HashSet<_> = [ops[0].id, ops[2].id, ops[4].id].into_iter().collect();
        assert_eq!(queue.remove_by_ids(&remove).unwrap(), 3);
        assert_eq!(ids(&queue.snapshot()), vec![ops[1].id, ops[3].id]);
    }

    #[test]
    fn remove_unknown_ids_is_noop() {
        let (_, queue) = queue();
        queue.enqueue(Verb::Create, EntityKind::Product, json!({})).unwrap();

        let remove: HashSet<_> = [OperationId::generate()].into_iter().collect();
        assert_eq!(queue.remove_by_ids(&remove).unwrap(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn failed_write_leaves_queue_unchanged() {
        let backend = Arc::new(InMemoryBackend::with_quota(300));
        let queue = SyncQueue::new(backend, &SyncConfig::default());
        queue.enqueue(Verb::Create, EntityKind::Product, json!({"id": 1})).unwrap();

        let result = queue.enqueue(Verb::Create, EntityKind::Product, json!({"blob": "x".repeat(400)}));
        assert!(matches!(
            result,
            Err(SyncError::Storage(StorageError::QuotaExceeded { .. }))
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn corrupted_queue_reads_empty_but_refuses_enqueue() {
        let (backend, queue) = queue();
        backend.put("sync_queue", "{oops".into()).unwrap();

        assert!(queue.snapshot().is_empty());
        assert!(queue.enqueue(Verb::Create, EntityKind::Product, json!({})).is_err());
        // The corrupted value is left for inspection
        assert_eq!(backend.get("sync_queue").unwrap().as_deref(), Some("{oops"));
    }

    #[test]
    fn record_failure_schedules_backoff() {
        let (_, queue) = queue();
        let op = queue.enqueue(Verb::Create, EntityKind::Customer, json!({"id": "c1"})).unwrap();
        let retry = RetryConfig::new(5)
            .with_initial_delay(std::time::Duration::from_secs(10))
            .with_jitter(false);
        let now = Utc::now();

        let outcome = queue
            .record_failure(&op, &SyncError::rejected("invalid email"), &retry, now)
            .unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                attempts: 1,
                next_attempt_at: now + chrono::Duration::seconds(10),
            }
        );

        let state = queue.retry_state(&op.id).unwrap();
        assert_eq!(state.attempts, 1);
        assert!(state.last_error.contains("invalid email"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn record_failure_dead_letters_after_budget() {
        let (_, queue) = queue();
        let op = queue.enqueue(Verb::Create, EntityKind::Supplier, json!({"id": "s1"})).unwrap();
        let keep = queue.enqueue(Verb::Create, EntityKind::Supplier, json!({"id": "s2"})).unwrap();
        let retry = RetryConfig::immediate(3);
        let err = SyncError::rejected_with_status(500, "server error");

        for expected in 1..3 {
            let outcome = queue.record_failure(&op, &err, &retry, Utc::now()).unwrap();
            assert!(matches!(outcome, FailureOutcome::Retry { attempts, .. } if attempts == expected));
        }
        let outcome = queue.record_failure(&op, &err, &retry, Utc::now()).unwrap();
        assert_eq!(outcome, FailureOutcome::DeadLettered { attempts: 3 });

        assert_eq!(ids(&queue.snapshot()), vec![keep.id]);
        assert!(queue.retry_state(&op.id).is_none());

        let letters = queue.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].operation, op);
        assert_eq!(letters[0].attempts, 3);
    }

    #[test]
    fn removing_an_operation_forgets_its_retry_state() {
        let (_, queue) = queue();
        let op = queue.enqueue(Verb::Create, EntityKind::Product, json!({})).unwrap();
        queue
            .record_failure(&op, &SyncError::rejected("nope"), &RetryConfig::immediate(5), Utc::now())
            .unwrap();
        assert!(queue.retry_state(&op.id).is_some());

        queue.remove_by_ids(&[op.id].into_iter().collect()).unwrap();
        assert!(queue.retry_states().is_empty());
    }

    #[test]
    fn dead_letter_then_requeue() {
        let (_, queue) = queue();
        let op = queue.enqueue(Verb::Update, EntityKind::Settings, json!({"currency": "USD"})).unwrap();

        queue.dead_letter(&op, "unsupported").unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters()[0].reason, "unsupported");

        assert_eq!(queue.requeue_dead_letters().unwrap(), 1);
        assert!(queue.dead_letters().is_empty());

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_ne!(snapshot[0].id, op.id);
        assert_eq!(snapshot[0].payload, op.payload);
        assert_eq!(snapshot[0].entity_kind, EntityKind::Settings);
    }

    /// Fails every write to one key once armed.
    struct FailingKey {
        inner: InMemoryBackend,
        key: &'static str,
        armed: Mutex<bool>,
    }

    impl FailingKey {
        fn new(key: &'static str) -> Self {
            Self {
                inner: InMemoryBackend::new(),
                key,
                armed: Mutex::new(false),
            }
        }

        fn arm(&self) {
            *self.armed.lock() = true;
        }
    }

    impl KeyValueBackend for FailingKey {
        fn get(&self, key: &str) -> ledgersync_storage::StorageResult<Option<String>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: String) -> ledgersync_storage::StorageResult<()> {
            if *self.armed.lock() && key == self.key {
                return Err(StorageError::Corrupted(format!("write to {key} refused")));
            }
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> ledgersync_storage::StorageResult<()> {
            self.inner.remove(key)
        }

        fn scan_prefix(&self, prefix: &str) -> ledgersync_storage::StorageResult<Vec<(String, String)>> {
            self.inner.scan_prefix(prefix)
        }

        fn flush(&self) -> ledgersync_storage::StorageResult<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn requeue_never_duplicates_when_clearing_fails() {
        let backend = Arc::new(FailingKey::new("sync_dead_letters"));
        let queue = SyncQueue::new(backend.clone(), &SyncConfig::default());
        let op = queue.enqueue(Verb::Create, EntityKind::Sale, json!({"id": "s1"})).unwrap();
        queue.dead_letter(&op, "unsupported").unwrap();

        backend.arm();
        assert!(queue.requeue_dead_letters().is_err());
        assert!(queue.requeue_dead_letters().is_err());

        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
    }

    #[test]
    fn requeue_keeps_letters_when_queue_write_fails() {
        let backend = Arc::new(FailingKey::new("sync_queue"));
        let queue = SyncQueue::new(backend.clone(), &SyncConfig::default());
        let op = queue.enqueue(Verb::Update, EntityKind::Customer, json!({"id": "c1"})).unwrap();
        queue.dead_letter(&op, "rejected").unwrap();

        backend.arm();
        assert!(queue.requeue_dead_letters().is_err());

        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters()[0].operation, op);
    }

    #[test]
    fn removal_succeeds_when_ledger_write_fails() {
        let backend = Arc::new(FailingKey::new("sync_queue_retry"));
        let queue = SyncQueue::new(backend.clone(), &SyncConfig::default());
        let op = queue.enqueue(Verb::Create, EntityKind::Product, json!({})).unwrap();
        let other = queue.enqueue(Verb::Create, EntityKind::Product, json!({})).unwrap();
        queue
            .record_failure(&op, &SyncError::rejected("nope"), &RetryConfig::immediate(5), Utc::now())
            .unwrap();

        backend.arm();
        let removed = queue.remove_by_ids(&[op.id].into_iter().collect()).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(ids(&queue.snapshot()), vec![other.id]);
    }

    #[test]
    fn discard_dead_letters() {
        let (_, queue) = queue();
        let op = queue.enqueue(Verb::Delete, EntityKind::Sale, json!({"id": "s1"})).unwrap();
        queue.dead_letter(&op, "unsupported").unwrap();

        assert_eq!(queue.discard_dead_letters().unwrap(), 1);
        assert_eq!(queue.discard_dead_letters().unwrap(), 0);
        assert!(queue.dead_letters().is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn kind_strategy() -> impl Strategy<Value = EntityKind> {
            prop::sample::select(EntityKind::ALL.to_vec())
        }

        fn verb_strategy() -> impl Strategy<Value = Verb> {
            prop::sample::select(Verb::ALL.to_vec())
        }

        proptest! {
            #[test]
            fn n_enqueues_read_back_in_order(
                entries in prop::collection::vec((verb_strategy(), kind_strategy(), any::<u32>()), 0..40)
            ) {
                let backend = Arc::new(InMemoryBackend::new());
                let config = SyncConfig::default();
                let expected: Vec<_> = {
                    let queue = SyncQueue::new(backend.clone(), &config);
                    entries
                        .iter()
                        .map(|(verb, kind, n)| queue.enqueue(*verb, *kind, json!({"n": n})).unwrap())
                        .collect()
                };

                // A fresh queue over the same backend sees the same list
                let reopened = SyncQueue::new(backend, &config);
                prop_assert_eq!(reopened.len(), entries.len());
                prop_assert_eq!(reopened.snapshot(), expected);
            }
        }
    }
}
