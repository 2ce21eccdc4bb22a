//! Persistent Configuration Store: the control service's durable copy of the
//! cluster-wide `Configuration` document.
//!
//! Grounded on the teacher's `ServerConfig::read`/`write` (read-or-seed on
//! boot, `serde_json` on disk) but adds two things the teacher's config
//! loader doesn't need: an in-memory cache behind a `parking_lot::RwLock`
//! (the REST API and control service both read this on every request) and
//! write-temp-then-rename so a crash mid-write can never leave a half-written
//! file for the next boot to choke on.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

use crate::model::{Configuration, ConfigTag};

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("configuration tag mismatch: expected {expected}, store is at {actual}")]
    TagMismatch {
        expected: ConfigTag,
        actual: ConfigTag,
    },
    #[error("failed to read persistent store at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("persistent store at {path} contains invalid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "persistent store at {path} is version {found}, this build only understands version {expected}"
    )]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("failed to write persistent store at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable, cached store for the single current `Configuration`.
///
/// Every write replaces the whole document — there is no partial update at
/// this layer, matching invariant 2 (single source of truth) from the data
/// model: callers load the current `Configuration`, produce a new one, and
/// hand it back with the tag they started from.
pub struct ConfigurationStore {
    path: PathBuf,
    cache: RwLock<Configuration>,
}

impl ConfigurationStore {
    /// Opens the store at `path`, reading an existing document or seeding an
    /// empty one if the file doesn't exist yet. A file that exists but
    /// doesn't parse is treated as fatal: this store backs the only copy of
    /// cluster state the control service has, and silently discarding it
    /// would be worse than refusing to start.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigStoreError> {
        let path = path.into();
        let configuration: Configuration = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| ConfigStoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Configuration::empty(),
            Err(source) => return Err(ConfigStoreError::Read { path, source }),
        };

        if configuration.version != Configuration::CURRENT_VERSION {
            return Err(ConfigStoreError::UnsupportedVersion {
                path,
                found: configuration.version,
                expected: Configuration::CURRENT_VERSION,
            });
        }

        let store = Self {
            path,
            cache: RwLock::new(configuration),
        };
        if !store.path.exists() {
            store.persist(&store.cache.read())?;
        }
        Ok(store)
    }

    /// Returns a clone of the current configuration and its tag. Cloning is
    /// cheap: `Configuration` is a flat value type (no reference-counted
    /// subgraphs to share), and handing callers an owned copy means the lock
    /// is never held across a REST handler's `.await`.
    pub fn get(&self) -> Configuration {
        self.cache.read().clone()
    }

    pub fn tag(&self) -> ConfigTag {
        self.cache.read().tag
    }

    /// Replaces the stored configuration with `new_configuration`, but only
    /// if the store is still at `expected_tag`. This is the compare-and-swap
    /// the REST API's conditional update headers are built on: a caller reads
    /// a configuration, computes a change, and submits it guarded by the tag
    /// it read, so a concurrent writer can never be silently overwritten.
    pub fn set_if_matches(
        &self,
        expected_tag: ConfigTag,
        new_configuration: Configuration,
    ) -> Result<ConfigTag, ConfigStoreError> {
        let mut guard = self.cache.write();
        if guard.tag != expected_tag {
            return Err(ConfigStoreError::TagMismatch {
                expected: expected_tag,
                actual: guard.tag,
            });
        }
        self.persist(&new_configuration)?;
        let tag = new_configuration.tag;
        *guard = new_configuration;
        Ok(tag)
    }

    fn persist(&self, configuration: &Configuration) -> Result<(), ConfigStoreError> {
        let content = serde_json::to_string_pretty(configuration).expect("Configuration always serializes");
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|source| ConfigStoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| ConfigStoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_missing_path_seeds_an_empty_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_configuration.json");
        let store = ConfigurationStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get().nodes.len(), 0);
    }

    #[test]
    fn reopening_preserves_written_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_configuration.json");
        let store = ConfigurationStore::open(&path).unwrap();
        let mut configuration = store.get();
        let tag = configuration.tag;
        configuration.tag = tag.next();
        store.set_if_matches(tag, configuration).unwrap();

        let reopened = ConfigurationStore::open(&path).unwrap();
        assert_eq!(reopened.tag(), tag.next());
    }

    #[test]
    fn set_if_matches_rejects_stale_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_configuration.json");
        let store = ConfigurationStore::open(&path).unwrap();
        let stale_tag = store.tag();

        let mut first = store.get();
        first.tag = stale_tag.next();
        store.set_if_matches(stale_tag, first).unwrap();

        let mut second = store.get();
        second.tag = stale_tag.next().next();
        let err = store.set_if_matches(stale_tag, second).unwrap_err();
        assert!(matches!(err, ConfigStoreError::TagMismatch { .. }));
    }

    #[test]
    fn mismatched_version_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_configuration.json");
        let mut configuration = Configuration::empty();
        configuration.version = Configuration::CURRENT_VERSION + 1;
        std::fs::write(&path, serde_json::to_string(&configuration).unwrap()).unwrap();

        let err = ConfigurationStore::open(&path).unwrap_err();
        assert!(matches!(err, ConfigStoreError::UnsupportedVersion { .. }));
    }

    #[test]
    fn corrupt_store_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_configuration.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = ConfigurationStore::open(&path).unwrap_err();
        assert!(matches!(err, ConfigStoreError::Corrupt { .. }));
    }
}
