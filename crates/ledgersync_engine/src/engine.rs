//! Sync engine: the public surface and the sync pass.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::executor::{HandlerRegistry, OperationExecutor};
use crate::operation::{DeadLetter, EntityKind, OperationId, QueuedOperation, Verb};
use crate::queue::{FailureOutcome, SyncQueue};
use crate::worker::{SyncWorker, WorkerCommand, WorkerHandle};
use chrono::Utc;
use ledgersync_storage::{KeyValueBackend, LocalStore};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass is running.
    Idle,
    /// A pass is draining the queue.
    Syncing,
}

/// How a sync pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// Every operation in the snapshot was attempted or deferred.
    Completed,
    /// A connectivity failure stopped the pass early.
    HaltedOffline,
    /// The queue was empty; nothing was attempted.
    Empty,
    /// The engine is offline; nothing was attempted.
    Offline,
    /// Another pass was running; nothing was attempted.
    AlreadyRunning,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// How the pass ended.
    pub status: PassStatus,
    /// Number of backend calls made.
    pub attempted: usize,
    /// Operations confirmed and removed from the queue.
    pub succeeded: Vec<OperationId>,
    /// Operations that failed and stay queued.
    pub failed: Vec<OperationId>,
    /// Operations skipped because their backoff has not elapsed.
    pub deferred: Vec<OperationId>,
    /// Operations moved to the dead letters.
    pub dead_lettered: Vec<OperationId>,
    /// Queue length after the pass.
    pub remaining: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl PassReport {
    fn new(status: PassStatus, remaining: usize) -> Self {
        Self {
            status,
            attempted: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            deferred: Vec::new(),
            dead_lettered: Vec::new(),
            remaining,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the pass made no backend calls.
    pub fn is_noop(&self) -> bool {
        self.attempted == 0
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that attempted at least one operation.
    pub passes_completed: u64,
    /// Operations confirmed by the backend.
    pub operations_synced: u64,
    /// Failed attempts that left the operation queued.
    pub operations_failed: u64,
    /// Operations moved to the dead letters.
    pub operations_dead_lettered: u64,
    /// Passes stopped by a connectivity failure.
    pub connectivity_halts: u64,
    /// Last time a pass finished.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Notifications for status indicators.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A pass started with this many operations in its snapshot.
    PassStarted {
        /// Snapshot length.
        pending: usize,
    },
    /// A pass finished.
    PassFinished(PassReport),
    /// A connectivity failure flipped the engine offline.
    WentOffline,
    /// An operation will no longer be retried automatically.
    DeadLettered {
        /// The operation.
        id: OperationId,
        /// Why it was given up on.
        reason: String,
    },
}

struct EngineInner {
    config: SyncConfig,
    local: LocalStore,
    queue: SyncQueue,
    executor: OperationExecutor,
    monitor: ConnectivityMonitor,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    pass_lock: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
    worker: RwLock<Option<mpsc::Sender<WorkerCommand>>>,
}

/// The offline write buffer and sync orchestrator.
///
/// One engine is created by the application's composition root and handed
/// to collaborators; clones share the same state. Collaborators write local
/// records and queue remote effects; the background worker started with
/// [`SyncEngine::spawn_worker`] drains the queue whenever the engine is
/// online.
///
/// # Example
///
/// ```
/// use ledgersync_engine::{
///     ConnectivityMonitor, EntityKind, HandlerRegistry, MockHandler, SyncConfig, SyncEngine, Verb,
/// };
/// use ledgersync_storage::InMemoryBackend;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test_block_on(async {
/// let engine = SyncEngine::new(
///     SyncConfig::new("shop"),
///     Arc::new(InMemoryBackend::new()),
///     HandlerRegistry::uniform(Arc::new(MockHandler::new())),
///     ConnectivityMonitor::new(false),
/// )
/// .unwrap();
///
/// engine.queue_for_sync(EntityKind::Product, Verb::Create, json!({"id": "p1"}));
/// assert_eq!(engine.pending_sync_count(), 1);
///
/// engine.set_online(true);
/// engine.sync_now().await.unwrap();
/// assert_eq!(engine.pending_sync_count(), 0);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates a new sync engine.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.namespace` is not a valid local-store
    /// namespace.
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn KeyValueBackend>,
        registry: HandlerRegistry,
        monitor: ConnectivityMonitor,
    ) -> SyncResult<Self> {
        let local = LocalStore::new(backend.clone(), config.namespace.clone())?;
        let queue = SyncQueue::new(backend, &config);
        let executor = OperationExecutor::new(registry).with_timeout(config.operation_timeout);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                local,
                queue,
                executor,
                monitor,
                state: RwLock::new(SyncState::Idle),
                stats: RwLock::new(SyncStats::default()),
                pass_lock: Mutex::new(()),
                events,
                worker: RwLock::new(None),
            }),
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the connectivity monitor shared with the engine.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    /// Returns the namespaced local store.
    pub fn local_store(&self) -> &LocalStore {
        &self.inner.local
    }

    /// Returns the pending queue.
    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    /// Subscribes to pass and connectivity notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    // -- local records --------------------------------------------------

    /// Stores a local record. Failures are logged and ignored.
    pub fn save_local<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.inner.local.set(key, value);
    }

    /// Reads a local record.
    pub fn get_local<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.local.get(key)
    }

    /// Reads every local record whose key starts with `prefix`.
    pub fn get_all_local(&self, prefix: &str) -> Vec<Value> {
        self.inner.local.scan_prefix(prefix)
    }

    // -- queue ----------------------------------------------------------

    /// Queues a remote effect and, when online, asks the worker for a pass.
    ///
    /// Returns the new operation's id, or `None` if it could not be
    /// persisted (the failure is logged).
    pub fn queue_for_sync(&self, kind: EntityKind, verb: Verb, payload: Value) -> Option<OperationId> {
        match self.inner.queue.enqueue(verb, kind, payload) {
            Ok(op) => {
                if self.is_online_mode() {
                    self.request_sync();
                }
                Some(op.id)
            }
            Err(e) => {
                warn!(kind = %kind, verb = %verb, error = %e, "operation not queued");
                None
            }
        }
    }

    /// Writes the local working copy and queues the matching remote effect.
    ///
    /// A delete removes the local record; create and update overwrite it.
    pub fn save_offline(
        &self,
        kind: EntityKind,
        verb: Verb,
        key: &str,
        payload: Value,
    ) -> Option<OperationId> {
        match verb {
            Verb::Delete => self.inner.local.remove(key),
            Verb::Create | Verb::Update => self.inner.local.set(key, &payload),
        }
        self.queue_for_sync(kind, verb, payload)
    }

    /// Returns the number of operations awaiting sync.
    pub fn pending_sync_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns the pending operations in queue order.
    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.inner.queue.snapshot()
    }

    /// Returns operations that are no longer retried automatically.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.queue.dead_letters()
    }

    /// Returns the number of dead-lettered operations.
    pub fn dead_letter_count(&self) -> usize {
        self.inner.queue.dead_letters().len()
    }

    /// Queues every dead letter again at the end of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn requeue_dead_letters(&self) -> SyncResult<usize> {
        let count = self.inner.queue.requeue_dead_letters()?;
        if count > 0 && self.is_online_mode() {
            self.request_sync();
        }
        Ok(count)
    }

    // -- connectivity ---------------------------------------------------

    /// Returns the current connectivity flag.
    pub fn is_online_mode(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// Sets the connectivity flag. Going online makes the worker start a
    /// pass.
    pub fn set_online(&self, online: bool) -> bool {
        self.inner.monitor.set_online(online)
    }

    // -- passes ---------------------------------------------------------

    /// Starts the background worker on the current tokio runtime.
    ///
    /// Returns `None` if a worker is already running for this engine.
    pub fn spawn_worker(&self) -> Option<WorkerHandle> {
        let mut slot = self.inner.worker.write();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            warn!("sync worker already running");
            return None;
        }

        let (tx, rx) = mpsc::channel(1);
        *slot = Some(tx.clone());
        drop(slot);

        let worker = SyncWorker::new(self.clone(), rx);
        Some(WorkerHandle::spawn(worker, tx))
    }

    /// Asks the worker for a pass. Requests made while one is already
    /// pending are merged into it.
    ///
    /// Returns false if no worker is running.
    pub fn request_sync(&self) -> bool {
        let slot = self.inner.worker.read();
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(WorkerCommand::Resync) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Runs a pass now unless one is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the outcome of the pass could not be persisted.
    pub async fn sync_now(&self) -> SyncResult<PassReport> {
        match self.inner.pass_lock.try_lock() {
            Ok(_guard) => self.run_pass().await,
            Err(_) => {
                debug!("pass already running, request ignored");
                Ok(PassReport::new(PassStatus::AlreadyRunning, self.pending_sync_count()))
            }
        }
    }

    /// Runs a pass once any running pass has finished.
    pub(crate) async fn sync_after_current(&self) -> SyncResult<PassReport> {
        let _guard = self.inner.pass_lock.lock().await;
        self.run_pass().await
    }

    // Caller holds the pass lock.
    async fn run_pass(&self) -> SyncResult<PassReport> {
        let inner = &self.inner;

        if !inner.monitor.is_online() {
            return Ok(PassReport::new(PassStatus::Offline, inner.queue.len()));
        }

        let snapshot = inner.queue.snapshot();
        if snapshot.is_empty() {
            return Ok(PassReport::new(PassStatus::Empty, 0));
        }

        self.set_state(SyncState::Syncing);
        let start = Instant::now();
        let _ = inner.events.send(SyncEvent::PassStarted {
            pending: snapshot.len(),
        });
        info!(pending = snapshot.len(), "sync pass started");

        let mut report = PassReport::new(PassStatus::Completed, 0);
        let mut succeeded = HashSet::new();
        let mut last_error = None;
        let retry_states = inner.queue.retry_states();
        let pass_time = Utc::now();

        for op in &snapshot {
            if let Some(retry) = retry_states.get(&op.id) {
                if !retry.is_due(pass_time) {
                    debug!(op_id = %op.id, attempts = retry.attempts, "operation deferred");
                    report.deferred.push(op.id);
                    continue;
                }
            }

            report.attempted += 1;
            match inner.executor.execute(op).await {
                Ok(()) => {
                    debug!(op_id = %op.id, kind = %op.entity_kind, verb = %op.verb, "operation synced");
                    succeeded.insert(op.id);
                    report.succeeded.push(op.id);
                }
                Err(e) if e.is_connectivity() => {
                    warn!(op_id = %op.id, error = %e, "backend unreachable, halting pass");
                    last_error = Some(e.to_string());
                    report.status = PassStatus::HaltedOffline;
                    if inner.monitor.set_online(false) {
                        let _ = inner.events.send(SyncEvent::WentOffline);
                    }
                    break;
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    self.handle_failure(op, &e, &mut report);
                }
            }
        }

        let removal = inner.queue.remove_by_ids(&succeeded);
        report.remaining = inner.queue.len();
        report.duration = start.elapsed();

        {
            let mut stats = inner.stats.write();
            stats.passes_completed += 1;
            stats.operations_synced += report.succeeded.len() as u64;
            stats.operations_failed += report.failed.len() as u64;
            stats.operations_dead_lettered += report.dead_lettered.len() as u64;
            if report.status == PassStatus::HaltedOffline {
                stats.connectivity_halts += 1;
            }
            stats.last_sync_time = Some(Instant::now());
            if let Err(e) = &removal {
                stats.last_error = Some(e.to_string());
            } else if last_error.is_some() {
                stats.last_error = last_error;
            }
        }

        self.set_state(SyncState::Idle);
        info!(
            status = ?report.status,
            synced = report.succeeded.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            dead_lettered = report.dead_lettered.len(),
            remaining = report.remaining,
            "sync pass finished"
        );
        let _ = inner.events.send(SyncEvent::PassFinished(report.clone()));

        match removal {
            Ok(_) => Ok(report),
            Err(e) => {
                error!(error = %e, "synced operations could not be removed from the queue");
                Err(e)
            }
        }
    }

    fn handle_failure(&self, op: &QueuedOperation, err: &SyncError, report: &mut PassReport) {
        let inner = &self.inner;

        if !err.is_retryable() {
            warn!(op_id = %op.id, error = %err, "operation cannot succeed, dead-lettering");
            match inner.queue.dead_letter(op, err.to_string()) {
                Ok(()) => self.note_dead_letter(op, err, report),
                Err(e) => error!(op_id = %op.id, error = %e, "dead letter not persisted"),
            }
            return;
        }

        match inner
            .queue
            .record_failure(op, err, &inner.config.retry, Utc::now())
        {
            Ok(FailureOutcome::Retry {
                attempts,
                next_attempt_at,
            }) => {
                warn!(op_id = %op.id, attempts, %next_attempt_at, error = %err, "operation failed, will retry");
                report.failed.push(op.id);
            }
            Ok(FailureOutcome::DeadLettered { attempts }) => {
                warn!(op_id = %op.id, attempts, error = %err, "retry budget spent, dead-lettering");
                self.note_dead_letter(op, err, report);
            }
            Err(e) => {
                error!(op_id = %op.id, error = %e, "failure not recorded");
                report.failed.push(op.id);
            }
        }
    }

    fn note_dead_letter(&self, op: &QueuedOperation, err: &SyncError, report: &mut PassReport) {
        report.dead_lettered.push(op.id);
        let _ = self.inner.events.send(SyncEvent::DeadLettered {
            id: op.id,
            reason: err.to_string(),
        });
    }

    fn set_state(&self, state: SyncState) {
        *self.inner.state.write() = state;
    }
}
