//! File-backed cache store
//!
//! Persists each cache entry as a JSON file under
//! `<cache_dir>/<namespace>/<key prefix>-<key digest>.json`, so cached
//! upstream responses survive restarts of the proxy server.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::store::{CacheEntry, Store, StoreError};

/// Longest readable key prefix kept in a file name
const NAME_PREFIX_LEN: usize = 64;

/// Stores cache entries as JSON files on disk
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a concurrent reader sees either the old entry or the new one.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where namespace subdirectories are created
    cache_dir: PathBuf,
}

impl FileStore {
    /// Creates a FileStore in the XDG-compliant cache directory
    ///
    /// Uses `~/.cache/skydesk/` on Linux, or the platform equivalent.
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "skydesk")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a FileStore rooted at a custom directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.cache_dir.join(escape(namespace))
    }

    /// Returns the path to the file holding `key`
    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace).join(file_name(key))
    }

    fn read_entry(path: &Path) -> Result<Option<CacheEntry>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Iterates over the entry files of a namespace, skipping temp files
    fn entry_files(&self, namespace: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.namespace_dir(namespace);
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for item in read_dir {
            let path = item?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl Store for FileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let entry = Self::read_entry(&self.entry_path(namespace, key))?;
        // Guard against a hand-edited or foreign file under the same name.
        Ok(entry.filter(|e| e.key == key))
    }

    fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StoreError> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(&entry)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(self.entry_path(namespace, &entry.key))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn delete_if(&self, namespace: &str, key: &str, fetched_at: i64) -> Result<bool, StoreError> {
        let path = self.entry_path(namespace, key);
        // A put that landed since the caller's read carries a newer timestamp
        let current = match Self::read_entry(&path) {
            Ok(entry) => entry,
            Err(StoreError::Serialization(_)) => None,
            Err(e) => return Err(e),
        };
        if current.is_some_and(|e| e.key != key || e.fetched_at != fetched_at) {
            return Ok(false);
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_older_than(&self, namespace: &str, cutoff_ms: i64) -> Result<usize, StoreError> {
        let mut removed = 0;
        for path in self.entry_files(namespace)? {
            let stale = match Self::read_entry(&path) {
                Ok(Some(entry)) => entry.fetched_at < cutoff_ms,
                Ok(None) => false,
                // Unreadable files can never be served, so sweep them too
                Err(StoreError::Serialization(_)) => true,
                Err(e) => return Err(e),
            };
            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }

    fn len(&self, namespace: &str) -> Result<usize, StoreError> {
        Ok(self.entry_files(namespace)?.len())
    }
}

/// Builds a bounded file name for `key`
///
/// The escaped key is cut to `NAME_PREFIX_LEN` bytes and followed by the hex
/// SHA-256 of the full key, so arbitrarily long keys stay well under the
/// 255-byte name limit of common filesystems.
fn file_name(key: &str) -> String {
    let mut prefix = escape(key);
    prefix.truncate(NAME_PREFIX_LEN);
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}-{}.json", prefix, digest)
}

/// Escapes a name for the filesystem: `[A-Za-z0-9._-]` pass through, every
/// other byte becomes `%XX`.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
