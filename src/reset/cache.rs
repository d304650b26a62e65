// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Saved config-space store.
//!
//! The first reset of a device captures its PCI config space; repeated resets
//! in the same host session reuse that first known-good copy instead of
//! overwriting it with post-reset state. Entries live as one file per device
//! under a runtime directory until explicitly cleared.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to access reset cache at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No cached config space for {key}")]
    Missing { key: String },
}

/// Per-device config-space cache, keyed by PCI address.
pub struct ConfigCache {
    root: PathBuf,
}

impl ConfigCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The per-boot default location.
    pub fn default_location() -> Self {
        Self::new(std::env::temp_dir().join("tenstorrent-reset-cache"))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.cfg"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    /// Stores `data` under `key` unless an entry already exists.
    ///
    /// Returns `true` when the entry was written, `false` when an earlier
    /// copy won.
    pub fn store(&mut self, key: &str, data: &[u8]) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        if path.exists() {
            debug!("reusing cached config space for {key}");
            return Ok(false);
        }

        std::fs::create_dir_all(&self.root).map_err(|e| CacheError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        std::fs::write(&path, data).map_err(|e| CacheError::Io { path, source: e })?;
        Ok(true)
    }

    pub fn load(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Err(CacheError::Missing {
                key: key.to_string(),
            });
        }
        std::fs::read(&path).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Drops every entry.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        if Path::new(&self.root).exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| CacheError::Io {
                path: self.root.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ConfigCache::new(dir.path().join("cache"));

        assert!(!cache.contains("0000:01:00.0"));
        assert!(cache.store("0000:01:00.0", &[1, 2, 3]).unwrap());

        // A second store must not clobber the first snapshot.
        assert!(!cache.store("0000:01:00.0", &[9, 9, 9]).unwrap());
        assert_eq!(cache.load("0000:01:00.0").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new(dir.path().join("cache"));
        assert!(matches!(
            cache.load("0000:01:00.0"),
            Err(CacheError::Missing { .. })
        ));
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ConfigCache::new(dir.path().join("cache"));
        cache.store("0000:01:00.0", &[5]).unwrap();
        cache.clear().unwrap();
        assert!(!cache.contains("0000:01:00.0"));
        // Cleared cache accepts a fresh snapshot again.
        assert!(cache.store("0000:01:00.0", &[7]).unwrap());
        assert_eq!(cache.load("0000:01:00.0").unwrap(), vec![7]);
    }
}
