//! # LedgerSync Engine
//!
//! Offline write buffering and background sync for LedgerSync.
//!
//! This crate provides:
//! - A durable, ordered queue of pending remote effects
//! - A connectivity monitor fed by host events and sync failures
//! - Dispatch of queued operations to per-entity backend handlers
//! - Single-flight sync passes with retry backoff and dead letters
//! - A background worker that drains the queue when the engine is online
//!
//! ## Architecture
//!
//! Collaborators write the local working copy through [`SyncEngine`] and
//! queue the matching remote effect. Nothing talks to the backend on the
//! write path. A sync pass snapshots the queue, replays the snapshot in
//! order through the [`OperationExecutor`], and removes confirmed
//! operations from the live queue by id, so work enqueued during a pass is
//! never lost.
//!
//! ## Key Invariants
//!
//! - Queue order is enqueue order; replay follows it
//! - An operation leaves the queue only after the backend confirmed it, or
//!   when it is moved to the dead letters
//! - At most one pass runs at a time per engine
//! - A connectivity failure halts the pass and flips the engine offline
//! - Delivery is at-least-once; handlers should tolerate replays

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod error;
mod executor;
mod http;
mod operation;
mod queue;
mod worker;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use engine::{PassReport, PassStatus, SyncEngine, SyncEvent, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use executor::{EntityHandler, HandlerRegistry, MockCall, MockHandler, OperationExecutor};
pub use http::{HttpClient, HttpError, HttpHandler, Method};
pub use operation::{DeadLetter, EntityKind, OperationId, QueuedOperation, RetryState, Verb};
pub use queue::{FailureOutcome, SyncQueue};
pub use worker::WorkerHandle;
