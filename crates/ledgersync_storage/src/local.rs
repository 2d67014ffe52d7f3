//! Namespaced JSON store used as the application's local working copy.

use crate::backend::KeyValueBackend;
use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// A namespaced view over a [`KeyValueBackend`] holding JSON values.
///
/// Every key is stored as `namespace:key`. Writes follow a best-effort
/// policy: [`LocalStore::set`] logs and swallows failures (quota, I/O,
/// serialization), so callers must not assume a value was stored just
/// because the call returned. [`LocalStore::try_set`] exposes the error for
/// callers that care.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KeyValueBackend>,
    namespace: String,
}

impl LocalStore {
    /// Creates a store that prefixes every key with `namespace:`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidNamespace`] if `namespace` contains
    /// `:`, which would let one namespace's keys fall under another's
    /// prefix.
    pub fn new(backend: Arc<dyn KeyValueBackend>, namespace: impl Into<String>) -> StorageResult<Self> {
        let namespace = namespace.into();
        if namespace.contains(':') {
            return Err(StorageError::InvalidNamespace(namespace));
        }
        Ok(Self { backend, namespace })
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the backend key used for `key`.
    #[must_use]
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Stores `value` under `key`. Failures are logged and ignored.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_set(key, value) {
            warn!(namespace = %self.namespace, key, error = %e, "local write dropped");
        }
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or the backend
    /// rejects the write.
    pub fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.put(&self.namespaced_key(key), json)
    }

    /// Returns the value stored under `key` decoded as `T`.
    ///
    /// Missing keys, unreadable backends and values that do not decode as
    /// `T` all read as `None`; the latter two are logged.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.namespaced_key(key);
        let raw = match self.backend.get(&full_key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %full_key, error = %e, "local read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full_key, error = %e, "stored value does not decode");
                None
            }
        }
    }

    /// Returns the raw JSON value stored under `key`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key)
    }

    /// Returns every value whose key (within the namespace) starts with
    /// `prefix`. Order is unspecified.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<Value> {
        self.scan_entries(prefix)
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }

    /// Like [`LocalStore::scan_prefix`] but also returns the keys, with the
    /// namespace stripped.
    pub fn scan_entries(&self, prefix: &str) -> Vec<(String, Value)> {
        let full_prefix = self.namespaced_key(prefix);
        let entries = match self.backend.scan_prefix(&full_prefix) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(prefix = %full_prefix, error = %e, "local scan failed");
                return Vec::new();
            }
        };

        let strip = self.namespace.len() + 1;
        entries
            .into_iter()
            .filter_map(|(key, raw)| match serde_json::from_str(&raw) {
                Ok(value) => Some((key[strip..].to_string(), value)),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable value");
                    None
                }
            })
            .collect()
    }

    /// Removes the value stored under `key`. Failures are logged and ignored.
    pub fn remove(&self, key: &str) {
        let full_key = self.namespaced_key(key);
        if let Err(e) = self.backend.remove(&full_key) {
            warn!(key = %full_key, error = %e, "local remove dropped");
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
