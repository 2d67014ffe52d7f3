//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level key-value backend for LedgerSync.
///
/// Backends are **opaque string stores**. Values are serialized JSON text
/// produced by the layers above; a backend never parses them.
///
/// # Invariants
///
/// - `get` returns exactly the value last written with `put` for that key
/// - `remove` of a missing key is not an error
/// - `scan_prefix` returns every entry whose key starts with the prefix,
///   in no particular order
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait KeyValueBackend: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable or the backend
    /// is out of capacity.
    fn put(&self, key: &str, value: String) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns all `(key, value)` pairs whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>>;

    /// Flushes any buffered writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}
