//! CLI command implementations.

pub mod dead_letters;
pub mod queue;
pub mod records;
pub mod status;

use ledgersync_engine::{SyncConfig, SyncQueue};
use ledgersync_storage::{FileBackend, KeyValueBackend, LocalStore};
use std::path::Path;
use std::sync::Arc;

/// A file-backed store opened for inspection.
pub struct Store {
    /// The pending queue, retry ledger and dead letters.
    pub queue: SyncQueue,
    /// Local records in the selected namespace.
    pub local: LocalStore,
}

/// Opens an existing store file.
pub fn open(path: &Path, namespace: &str) -> Result<Store, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    open_or_create(path, namespace)
}

/// Opens a store file, creating it and its parent directories if missing.
pub fn open_or_create(path: &Path, namespace: &str) -> Result<Store, Box<dyn std::error::Error>> {
    let backend: Arc<dyn KeyValueBackend> = Arc::new(FileBackend::open_with_create_dirs(path)?);
    let local = LocalStore::new(backend.clone(), namespace)?;
    let config = SyncConfig::new(namespace);
    tracing::debug!(path = %path.display(), namespace, "store opened");

    Ok(Store {
        queue: SyncQueue::new(backend.clone(), &config),
        local,
    })
}
