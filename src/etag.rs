//! Persistent ETag bookkeeping for repository downloads
//!
//! One JSON object mapping URL to the ETag the server last reported.
//! Read once at startup, mutated only during an update, and persisted
//! transactionally at the end of a successful update. An unreadable file
//! starts the store fresh with a warning; ETags are an optimization, not
//! state we can't afford to lose.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::txfile::atomic_write;
use crate::Result;

#[derive(Debug)]
pub struct EtagStore {
    path: PathBuf,
    map: HashMap<String, String>,
}

impl EtagStore {
    /// Load the store from `path`, starting empty if absent or unreadable
    pub fn load(path: &Path) -> Self {
        let map = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!("ignoring unreadable {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("ignoring unreadable {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        EtagStore {
            path: path.to_path_buf(),
            map,
        }
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.map.get(url).map(String::as_str)
    }

    /// Replace the whole map, as computed by an update's pending changes
    pub fn replace(&mut self, map: HashMap<String, String>) {
        self.map = map;
    }

    /// A copy of the current map for pending-change bookkeeping
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.clone()
    }

    /// Persist the map transactionally
    pub fn save(&self) -> Result<()> {
        let mut entries: Vec<(&String, &String)> = self.map.iter().collect();
        entries.sort();
        let ordered: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let bytes = serde_json::to_vec_pretty(&serde_json::Value::Object(ordered))?;
        atomic_write(&self.path, &bytes)
    }

    /// Discard in-memory state in favor of whatever is on disk
    ///
    /// This is the rollback path: any ETags recorded during a failed update
    /// are forgotten so the next update re-downloads those repositories.
    pub fn reload(&mut self) {
        *self = EtagStore::load(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = EtagStore::load(&dir.path().join("etags.json"));
        assert_eq!(store.get("https://example.com"), None);
    }

    #[test]
    fn test_garbage_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etags.json");
        fs::write(&path, b"not json at all").unwrap();
        let store = EtagStore::load(&path);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etags.json");

        let mut store = EtagStore::load(&path);
        let mut pending = store.snapshot();
        pending.insert("https://example.com/repo.json".to_string(), "\"abc\"".to_string());
        store.replace(pending);
        store.save().unwrap();

        let reloaded = EtagStore::load(&path);
        assert_eq!(
            reloaded.get("https://example.com/repo.json"),
            Some("\"abc\"")
        );
    }

    #[test]
    fn test_reload_discards_unsaved_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etags.json");

        let mut store = EtagStore::load(&path);
        let mut pending = store.snapshot();
        pending.insert("https://example.com/a".to_string(), "\"1\"".to_string());
        store.replace(pending);
        store.save().unwrap();

        let mut pending = store.snapshot();
        pending.insert("https://example.com/b".to_string(), "\"2\"".to_string());
        store.replace(pending);
        store.reload();

        assert_eq!(store.get("https://example.com/a"), Some("\"1\""));
        assert_eq!(store.get("https://example.com/b"), None);
    }
}
