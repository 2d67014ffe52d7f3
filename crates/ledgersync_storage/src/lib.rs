//! # LedgerSync Storage
//!
//! Key-value storage backends and the namespaced local store for LedgerSync.
//!
//! This crate is the lowest layer of the offline engine. Backends are
//! **opaque string stores**: they map keys to serialized JSON text and
//! never interpret what they hold. [`LocalStore`] sits on top and gives
//! collaborators a namespaced, typed view.
//!
//! ## Design Principles
//!
//! - Backends are simple key-value stores (get, put, remove, scan)
//! - Backends must be `Send + Sync` for concurrent access
//! - Every mutation is durable once the call returns `Ok`
//! - Local-store writes never fail loudly: failures are logged and dropped
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage in a single JSON file
//!
//! ## Example
//!
//! ```rust
//! use ledgersync_storage::{InMemoryBackend, LocalStore};
//! use std::sync::Arc;
//!
//! let store = LocalStore::new(Arc::new(InMemoryBackend::new()), "shop")?;
//! store.set("product:1", &serde_json::json!({"name": "Tea", "stock": 4}));
//! let value: serde_json::Value = store.get("product:1").unwrap();
//! assert_eq!(value["stock"], 4);
//! # Ok::<(), ledgersync_storage::StorageError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod local;
mod memory;

pub use backend::KeyValueBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use local::LocalStore;
pub use memory::InMemoryBackend;
