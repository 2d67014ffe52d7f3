//! Translation of queued operations into backend calls.

use crate::error::{SyncError, SyncResult};
use crate::operation::{EntityKind, QueuedOperation, Verb};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Applies operations for one or more entity kinds against the backend.
///
/// Each method resolves once the backend has confirmed the change. The
/// default bodies report [`SyncError::Unsupported`], so a handler only
/// implements the verbs its backend actually offers.
///
/// Failures must be tagged: [`SyncError::Connectivity`] when the backend
/// could not be reached, [`SyncError::Rejected`] when it refused.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    /// Creates the entity described by `payload`.
    async fn create(&self, kind: EntityKind, _payload: &Value) -> SyncResult<()> {
        Err(SyncError::Unsupported {
            kind,
            verb: Verb::Create,
        })
    }

    /// Updates the entity described by `payload`.
    async fn update(&self, kind: EntityKind, _payload: &Value) -> SyncResult<()> {
        Err(SyncError::Unsupported {
            kind,
            verb: Verb::Update,
        })
    }

    /// Deletes the entity described by `payload`.
    async fn delete(&self, kind: EntityKind, _payload: &Value) -> SyncResult<()> {
        Err(SyncError::Unsupported {
            kind,
            verb: Verb::Delete,
        })
    }
}

/// One handler per entity kind.
///
/// Every field must be filled to build a registry, so adding an
/// [`EntityKind`] variant fails to compile until it has a handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    /// Handler for products.
    pub product: Arc<dyn EntityHandler>,
    /// Handler for sales.
    pub sale: Arc<dyn EntityHandler>,
    /// Handler for customers.
    pub customer: Arc<dyn EntityHandler>,
    /// Handler for suppliers.
    pub supplier: Arc<dyn EntityHandler>,
    /// Handler for expenses.
    pub expense: Arc<dyn EntityHandler>,
    /// Handler for transactions.
    pub transaction: Arc<dyn EntityHandler>,
    /// Handler for settings.
    pub settings: Arc<dyn EntityHandler>,
}

impl HandlerRegistry {
    /// Uses the same handler for every entity kind.
    pub fn uniform(handler: Arc<dyn EntityHandler>) -> Self {
        Self {
            product: handler.clone(),
            sale: handler.clone(),
            customer: handler.clone(),
            supplier: handler.clone(),
            expense: handler.clone(),
            transaction: handler.clone(),
            settings: handler,
        }
    }

    /// Replaces the handler for one entity kind.
    pub fn with_handler(mut self, kind: EntityKind, handler: Arc<dyn EntityHandler>) -> Self {
        *self.slot_mut(kind) = handler;
        self
    }

    /// Returns the handler for `kind`.
    pub fn handler(&self, kind: EntityKind) -> &Arc<dyn EntityHandler> {
        match kind {
            EntityKind::Product => &self.product,
            EntityKind::Sale => &self.sale,
            EntityKind::Customer => &self.customer,
            EntityKind::Supplier => &self.supplier,
            EntityKind::Expense => &self.expense,
            EntityKind::Transaction => &self.transaction,
            EntityKind::Settings => &self.settings,
        }
    }

    fn slot_mut(&mut self, kind: EntityKind) -> &mut Arc<dyn EntityHandler> {
        match kind {
            EntityKind::Product => &mut self.product,
            EntityKind::Sale => &mut self.sale,
            EntityKind::Customer => &mut self.customer,
            EntityKind::Supplier => &mut self.supplier,
            EntityKind::Expense => &mut self.expense,
            EntityKind::Transaction => &mut self.transaction,
            EntityKind::Settings => &mut self.settings,
        }
    }
}

/// Executes queued operations through a [`HandlerRegistry`].
#[derive(Clone)]
pub struct OperationExecutor {
    registry: HandlerRegistry,
    timeout: Option<Duration>,
}

impl OperationExecutor {
    /// Creates an executor without a per-call timeout.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    /// Bounds each backend call. An elapsed call fails with
    /// [`SyncError::Timeout`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Applies one operation. Resolves once the backend confirmed it.
    ///
    /// # Errors
    ///
    /// Returns whatever the handler reports, or [`SyncError::Timeout`].
    pub async fn execute(&self, op: &QueuedOperation) -> SyncResult<()> {
        let handler = self.registry.handler(op.entity_kind);
        let kind = op.entity_kind;
        let call = async {
            match op.verb {
                Verb::Create => handler.create(kind, &op.payload).await,
                Verb::Update => handler.update(kind, &op.payload).await,
                Verb::Delete => handler.delete(kind, &op.payload).await,
            }
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| SyncError::Timeout)?,
            None => call.await,
        }
    }
}

/// A single call observed by [`MockHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Entity kind of the call.
    pub kind: EntityKind,
    /// Verb of the call.
    pub verb: Verb,
    /// Payload passed to the handler.
    pub payload: Value,
}

/// A scriptable handler for tests and demos.
///
/// Every call is recorded. Calls succeed unless a one-shot failure was
/// queued for that kind and verb with [`MockHandler::fail_next`], or the
/// pair was marked unsupported.
#[derive(Default)]
pub struct MockHandler {
    calls: Mutex<Vec<MockCall>>,
    scripted: Mutex<HashMap<(EntityKind, Verb), VecDeque<SyncError>>>,
    unsupported: Mutex<HashSet<(EntityKind, Verb)>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockHandler {
    /// Creates a handler where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call wait `latency` before resolving.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fails the next call for `kind` and `verb` with `error`.
    pub fn fail_next(&self, kind: EntityKind, verb: Verb, error: SyncError) {
        self.scripted
            .lock()
            .entry((kind, verb))
            .or_default()
            .push_back(error);
    }

    /// Makes every call for `kind` and `verb` report
    /// [`SyncError::Unsupported`].
    pub fn mark_unsupported(&self, kind: EntityKind, verb: Verb) {
        self.unsupported.lock().insert((kind, verb));
    }

    /// Returns every call so far, in call order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the highest number of calls that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, kind: EntityKind, verb: Verb, payload: &Value) -> SyncResult<()> {
        self.calls.lock().push(MockCall {
            kind,
            verb,
            payload: payload.clone(),
        });

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unsupported.lock().contains(&(kind, verb)) {
            return Err(SyncError::Unsupported { kind, verb });
        }
        match self
            .scripted
            .lock()
            .get_mut(&(kind, verb))
            .and_then(|queue| queue.pop_front())
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EntityHandler for MockHandler {
    async fn create(&self, kind: EntityKind, payload: &Value) -> SyncResult<()> {
        self.respond(kind, Verb::Create, payload).await
    }

    async fn update(&self, kind: EntityKind, payload: &Value) -> SyncResult<()> {
        self.respond(kind, Verb::Update, payload).await
    }

    async fn delete(&self, kind: EntityKind, payload: &Value) -> SyncResult<()> {
        self.respond(kind, Verb::Delete, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    struct CreateOnly;

    #[async_trait]
    impl EntityHandler for CreateOnly {
        async fn create(&self, _kind: EntityKind, _payload: &Value) -> SyncResult<()> {
            Ok(())
        }
    }

    fn op(kind: EntityKind, verb: Verb) -> QueuedOperation {
        QueuedOperation::new(verb, kind, json!({"id": "x1"}), Utc::now())
    }

    #[tokio::test]
    async fn dispatches_by_kind_and_verb() {
        let mock = Arc::new(MockHandler::new());
        let executor = OperationExecutor::new(HandlerRegistry::uniform(mock.clone()));

        executor.execute(&op(EntityKind::Product, Verb::Create)).await.unwrap();
        executor.execute(&op(EntityKind::Customer, Verb::Delete)).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].kind, calls[0].verb), (EntityKind::Product, Verb::Create));
        assert_eq!((calls[1].kind, calls[1].verb), (EntityKind::Customer, Verb::Delete));
        assert_eq!(calls[1].payload, json!({"id": "x1"}));
    }

    #[tokio::test]
    async fn missing_verbs_are_unsupported() {
        let registry = HandlerRegistry::uniform(Arc::new(MockHandler::new()))
            .with_handler(EntityKind::Sale, Arc::new(CreateOnly));
        let executor = OperationExecutor::new(registry);

        executor.execute(&op(EntityKind::Sale, Verb::Create)).await.unwrap();
        let err = executor
            .execute(&op(EntityKind::Sale, Verb::Update))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Unsupported {
                kind: EntityKind::Sale,
                verb: Verb::Update
            }
        ));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn scripted_failures_are_one_shot() {
        let mock = Arc::new(MockHandler::new());
        let executor = OperationExecutor::new(HandlerRegistry::uniform(mock.clone()));
        mock.fail_next(EntityKind::Expense, Verb::Update, SyncError::rejected("stale"));

        let first = executor.execute(&op(EntityKind::Expense, Verb::Update)).await;
        assert!(matches!(first, Err(SyncError::Rejected { .. })));
        executor.execute(&op(EntityKind::Expense, Verb::Update)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported() {
        let mock = Arc::new(MockHandler::new().with_latency(Duration::from_secs(60)));
        let executor = OperationExecutor::new(HandlerRegistry::uniform(mock))
            .with_timeout(Some(Duration::from_secs(1)));

        let err = executor
            .execute(&op(EntityKind::Transaction, Verb::Create))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
        assert!(err.is_connectivity());
    }
}
