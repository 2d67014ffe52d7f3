//! File-based storage backend for persistent storage.

use crate::backend::KeyValueBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A file-based key-value backend.
///
/// All entries live in a single JSON object file. The file is read once on
/// [`FileBackend::open`] and kept in memory; every mutation rewrites the
/// whole file.
///
/// # Durability
///
/// Writes use the write-then-rename pattern:
/// 1. Serialize the full map to a temporary sibling file
/// 2. `sync_all` the temporary file
/// 3. Rename it over the store file
/// 4. Fsync the parent directory (Unix)
///
/// A crash at any point leaves either the old or the new file, never a
/// torn one.
///
/// # Example
///
/// ```no_run
/// use ledgersync_storage::{KeyValueBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("store.json")).unwrap();
/// backend.put("sync_queue", "[]".into()).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// A missing or empty file opens as an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or
    /// [`StorageError::Corrupted`] if it does not hold a JSON object of
    /// strings.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let entries = if path.exists() {
            let mut data = String::new();
            File::open(path)?.read_to_string(&mut data)?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data).map_err(|e| {
                    StorageError::Corrupted(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let data = serde_json::to_vec(entries)?;
        let temp_path = self.temp_path();

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> StorageResult<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next)?;
        *entries = next;
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
        // Every mutation is already on disk
        Ok(())
    }
}
