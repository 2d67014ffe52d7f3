//! Queued operations and their retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What a queued operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// The entity was created locally.
    Create,
    /// The entity was modified locally.
    Update,
    /// The entity was deleted locally.
    Delete,
}

impl Verb {
    /// All verbs, in declaration order.
    pub const ALL: [Verb; 3] = [Verb::Create, Verb::Update, Verb::Delete];

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown verb '{}'", s))
    }
}

/// The domain object an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Catalogue product.
    Product,
    /// Completed sale.
    Sale,
    /// Customer record.
    Customer,
    /// Supplier record.
    Supplier,
    /// Business expense.
    Expense,
    /// Ledger transaction.
    Transaction,
    /// Shop-wide settings document.
    Settings,
}

impl EntityKind {
    /// All entity kinds, in declaration order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Product,
        EntityKind::Sale,
        EntityKind::Customer,
        EntityKind::Supplier,
        EntityKind::Expense,
        EntityKind::Transaction,
        EntityKind::Settings,
    ];

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Sale => "sale",
            EntityKind::Customer => "customer",
            EntityKind::Supplier => "supplier",
            EntityKind::Expense => "expense",
            EntityKind::Transaction => "transaction",
            EntityKind::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind '{}'", s))
    }
}

/// Unique identifier of a queued operation.
///
/// Generated at enqueue time from a random v4 UUID and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A durable record of an intended remote effect.
///
/// Operations are immutable once queued. They are only ever appended to
/// the queue or removed from it; retry bookkeeping lives separately in
/// [`RetryState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique id.
    pub id: OperationId,
    /// What to do.
    pub verb: Verb,
    /// Which kind of entity.
    pub entity_kind: EntityKind,
    /// Entity-shaped value handed to the backend verbatim.
    pub payload: Value,
    /// Enqueue time. Never earlier than the operation queued before it.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Creates an operation with a fresh id.
    pub fn new(verb: Verb, entity_kind: EntityKind, payload: Value, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: OperationId::generate(),
            verb,
            entity_kind,
            payload,
            enqueued_at,
        }
    }

    /// Returns the `id` field of the payload, if it has one.
    pub fn entity_id(&self) -> Option<String> {
        match self.payload.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Failure history of an operation that is still queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    /// Failed attempts so far.
    pub attempts: u32,
    /// Message of the most recent failure.
    pub last_error: String,
    /// The operation is skipped by passes that start before this time.
    pub next_attempt_at: DateTime<Utc>,
}

impl RetryState {
    /// Returns true if the backoff window has elapsed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_attempt_at
    }
}

/// An operation that will not be retried automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The operation as it was queued.
    pub operation: QueuedOperation,
    /// Failed attempts before it was given up on.
    pub attempts: u32,
    /// Why it was given up on.
    pub reason: String,
    /// When it left the queue.
    pub dead_lettered_at: DateTime<Utc>,
}
