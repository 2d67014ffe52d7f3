//! In-memory storage backend for testing.

use crate::backend::KeyValueBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that don't need persistence
///
/// An optional byte quota mimics the capacity limits of browser-style
/// storage; writes that would exceed it fail with
/// [`StorageError::QuotaExceeded`].
///
/// # Example
///
/// ```rust
/// use ledgersync_storage::{KeyValueBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.put("greeting", "\"hello\"".into()).unwrap();
/// assert_eq!(backend.get("greeting").unwrap().as_deref(), Some("\"hello\""));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that refuses writes once keys and values together
    /// would exceed `bytes`.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota: Some(bytes),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the total bytes used by keys and values.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        footprint(&self.entries.read())
    }

    /// Clears all data from the backend.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

fn footprint(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl KeyValueBackend for InMemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> StorageResult<()> {
        let mut entries = self.entries.write();

        if let Some(limit) = self.quota {
            let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
            let requested = footprint(&entries) - replaced + key.len() + value.len();
            if requested > limit {
                return Err(StorageError::QuotaExceeded { requested, limit });
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.used_bytes(), 0);
        assert_eq!(backend.get("missing").unwrap(), None);
    }

    #[test]
    fn memory_put_replaces_value() {
        let backend = InMemoryBackend::new();
        backend.put("k", "1".into()).unwrap();
        backend.put("k", "2".into()).unwrap();

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn memory_remove_missing_is_ok() {
        let backend = InMemoryBackend::new();
        backend.remove("nothing").unwrap();

        backend.put("k", "v".into()).unwrap();
        backend.remove("k").unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn memory_scan_prefix_only_matches_prefix() {
        let backend = InMemoryBackend::new();
        backend.put("shop:a", "1".into()).unwrap();
        backend.put("shop:b", "2".into()).unwrap();
        backend.put("shopx", "3".into()).unwrap();
        backend.put("other:a", "4".into()).unwrap();

        let mut found = backend.scan_prefix("shop:").unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("shop:a".to_string(), "1".to_string()),
                ("shop:b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn memory_quota_rejects_oversized_write() {
        let backend = InMemoryBackend::with_quota(10);
        backend.put("ab", "1234".into()).unwrap();

        let result = backend.put("cd", "123456789".into());
        assert!(matches!(result, Err(StorageError::QuotaExceeded { .. })));
        assert_eq!(backend.get("cd").unwrap(), None);
    }

    #[test]
    fn memory_quota_counts_replacement_once() {
        let backend = InMemoryBackend::with_quota(10);
        backend.put("ab", "12345678".into()).unwrap();
        // Same size replacement fits even though the sum of both would not
        backend.put("ab", "87654321".into()).unwrap();
        assert_eq!(backend.used_bytes(), 10);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn scan_prefix_matches_linear_filter(
                keys in prop::collection::vec("[a-c]{1,4}(:[a-c]{1,3})?", 0..32),
                prefix in "[a-c]{0,2}:?",
            ) {
                let backend = InMemoryBackend::new();
                for key in &keys {
                    backend.put(key, "null".into()).unwrap();
                }

                let mut scanned: Vec<String> = backend
                    .scan_prefix(&prefix)
                    .unwrap()
                    .into_iter()
                    .map(|(k, _)| k)
                    .collect();
                scanned.sort();

                let mut expected: Vec<String> = keys
                    .iter()
                    .filter(|k| k.starts_with(prefix.as_str()))
                    .cloned()
                    .collect();
                expected.sort();
                expected.dedup();

                prop_assert_eq!(scanned, expected);
            }
        }
    }
}
