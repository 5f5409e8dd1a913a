//! Cache storage module
//!
//! This module provides persistent caching functionality using the system's
//! standard cache directory. Data is serialized to JSON format for storage,
//! and entries older than the configured time-to-live are treated as missing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to determine cache directory location
    #[error("Failed to determine cache directory location")]
    CacheDirectoryNotFound,

    /// Failed to create or access cache directory
    #[error("Failed to create cache directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read cached data
    #[error("Failed to read cache file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write cached data
    #[error("Failed to write cache file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to deserialize cached data
    #[error("Failed to deserialize cache file {path}: {source}")]
    DeserializationFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to serialize data for caching
    #[error("Failed to serialize data: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// A generic cache storage for serializable data
///
/// Data is stored as one JSON file per identifier. Freshness is judged by
/// the file's modification time.
pub(crate) struct CacheStorage<T> {
    /// The directory where cached data is stored
    cache_dir: PathBuf,
    /// Entries older than this are ignored
    ttl: Duration,
    /// Phantom data for the generic type
    _phantom: PhantomData<T>,
}

impl<T> CacheStorage<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    /// Opens or creates a cache storage with the given name in the platform
    /// cache directory
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let cache: CacheStorage<Vec<EpisodeDescriptor>> =
    ///     CacheStorage::open("catalog", Duration::from_secs(3600))?;
    /// ```
    pub fn open(name: &str, ttl: Duration) -> Result<Self, CacheError> {
        let proj_dirs = crate::config::project_dirs().ok_or(CacheError::CacheDirectoryNotFound)?;
        Self::open_in(proj_dirs.cache_dir(), name, ttl)
    }

    /// Opens or creates a cache storage below an explicit base directory
    pub fn open_in(base_dir: &Path, name: &str, ttl: Duration) -> Result<Self, CacheError> {
        let cache_dir = base_dir.join(sanitize_name(name));

        fs::create_dir_all(&cache_dir).map_err(|e| CacheError::DirectoryCreationFailed {
            path: cache_dir.clone(),
            source: e,
        })?;

        Ok(Self {
            cache_dir,
            ttl,
            _phantom: PhantomData,
        })
    }

    /// Loads cached data for the given identifier
    ///
    /// Returns `None` if nothing is cached or the entry has expired. Returns an
    /// error if the data exists but cannot be read or deserialized.
    pub fn load(&self, identifier: &str) -> Result<Option<T>, CacheError> {
        let file_path = self.entry_path(identifier);

        let Ok(metadata) = fs::metadata(&file_path) else {
            return Ok(None);
        };

        if self.is_expired(&metadata) {
            return Ok(None);
        }

        let content = fs::read_to_string(&file_path).map_err(|e| CacheError::ReadFailed {
            path: file_path.clone(),
            source: e,
        })?;

        let data =
            serde_json::from_str(&content).map_err(|e| CacheError::DeserializationFailed {
                path: file_path,
                source: e,
            })?;

        Ok(Some(data))
    }

    /// Stores data in the cache with the given identifier
    pub fn store(&self, identifier: &str, data: &T) -> Result<(), CacheError> {
        let file_path = self.entry_path(identifier);

        let content = serde_json::to_string_pretty(data)?;

        fs::write(&file_path, content).map_err(|e| CacheError::WriteFailed {
            path: file_path,
            source: e,
        })?;

        Ok(())
    }

    fn entry_path(&self, identifier: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.json", sanitize_name(identifier)))
    }

    fn is_expired(&self, metadata: &fs::Metadata) -> bool {
        let Ok(modified) = metadata.modified() else {
            return true;
        };

        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > self.ttl,
            // Modified in the future: clock skew, treat as fresh
            Err(_) => false,
        }
    }
}

/// Sanitizes a name for use in file paths
///
/// Converts to lowercase and replaces all characters that are not
/// a-z, 0-9, or hyphen with underscores.
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Simple"), "simple");
        assert_eq!(sanitize_name("With Spaces"), "with_spaces");
        assert_eq!(sanitize_name("With-Hyphens"), "with-hyphens");
        assert_eq!(sanitize_name("Special!@#$%"), "special_____");
        assert_eq!(sanitize_name("Mixed123ABC"), "mixed123abc");
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache: CacheStorage<Vec<u32>> =
            CacheStorage::open_in(dir.path(), "numbers", Duration::from_secs(60)).unwrap();

        assert_eq!(cache.load("missing").unwrap(), None);

        cache.store("series/abc", &vec![1, 2, 3]).unwrap();
        assert_eq!(cache.load("series/abc").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_expired_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache: CacheStorage<String> =
            CacheStorage::open_in(dir.path(), "short", Duration::ZERO).unwrap();

        cache.store("key", &"value".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.load("key").unwrap(), None);
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache: CacheStorage<Vec<u32>> =
            CacheStorage::open_in(dir.path(), "corrupt", Duration::from_secs(60)).unwrap();

        fs::write(dir.path().join("corrupt").join("key.json"), "not json").unwrap();

        assert!(matches!(
            cache.load("key"),
            Err(CacheError::DeserializationFailed { .. })
        ));
    }
}
