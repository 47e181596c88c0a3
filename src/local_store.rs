//! Key/value JSON blobs on disk, one file per key. Failures are logged and
//! swallowed by `save`/`load`; in-memory state stays authoritative.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(error) = self.try_save(key, value) {
            warn!("[local-store] failed to save '{key}': {error}");
        }
    }

    /// Missing keys are `None` without a log line; unreadable or malformed
    /// blobs are `None` with one.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_load(key) {
            Ok(value) => value,
            Err(error) => {
                warn!("[local-store] failed to load '{key}': {error}");
                None
            }
        }
    }

    pub fn try_save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        let text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(|source| StoreError::Io { path, source })
    }

    pub fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Serde { path, source })
    }

    pub fn remove(&self, key: &str) {
        let path = self.path_for(key);
        if let Err(error) = fs::remove_file(&path) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!("[local-store] failed to remove {}: {error}", path.display());
            }
        }
    }

    /// Keys currently on disk, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    warn!("[local-store] failed to list {}: {error}", self.dir.display());
                }
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::constants::GAME_STATE_KEY;
    use crate::session::Session;
    use crate::types::{SessionSnapshot, VitalsDelta};

    pub(crate) fn temp_dir(name: &str) -> PathBuf {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            now_ms.saturating_add(rand::random::<u32>() as u64)
        );
        std::env::temp_dir().join(unique)
    }

    #[test]
    fn save_then_load_restores_session_snapshot() {
        let dir = temp_dir("local-store-roundtrip");
        let store = LocalStore::new(&dir);
        let mut session = Session::default();
        let id = session.add_player().expect("seat");
        session.add_player().expect("seat");
        session.apply_vitals_delta(id, VitalsDelta::Poison(4));

        store.save(GAME_STATE_KEY, &session.snapshot());
        let loaded: Option<SessionSnapshot> = store.load(GAME_STATE_KEY);
        assert_eq!(loaded, Some(session.snapshot()));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_key_is_absent() {
        let store = LocalStore::new(temp_dir("local-store-missing"));
        let loaded: Option<SessionSnapshot> = store.load("nothing-here");
        assert!(loaded.is_none());
        assert!(matches!(store.try_load::<SessionSnapshot>("nothing-here"), Ok(None)));
    }

    #[test]
    fn malformed_blob_is_reported_by_try_load_and_swallowed_by_load() {
        let dir = temp_dir("local-store-malformed");
        fs::create_dir_all(&dir).expect("create dir");
        let store = LocalStore::new(&dir);
        fs::write(store.path_for(GAME_STATE_KEY), "{ not json").expect("write file");

        assert!(matches!(
            store.try_load::<SessionSnapshot>(GAME_STATE_KEY),
            Err(StoreError::Serde { .. })
        ));
        assert!(store.load::<SessionSnapshot>(GAME_STATE_KEY).is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn snapshot_without_stats_loads_with_defaults() {
        let dir = temp_dir("local-store-legacy");
        fs::create_dir_all(&dir).expect("create dir");
        let store = LocalStore::new(&dir);
        let raw = r#"{
  "players": [
    {
      "id": 1,
      "name": "Ayla",
      "life": 31,
      "manaColor": "green",
      "commanderDamage": 0,
      "poisonCounters": 2,
      "isDead": false,
      "hasCrown": false
    }
  ],
  "gameHistory": ["[10:00:00] Ayla has joined the game."],
  "gameEnded": false
}"#;
        fs::write(store.path_for(GAME_STATE_KEY), raw).expect("write file");

        let loaded: SessionSnapshot = store.load(GAME_STATE_KEY).expect("snapshot");
        assert_eq!(loaded.players[0].life, 31);
        assert_eq!(loaded.players[0].stats.games_played, 0);
        assert_eq!(loaded.game_history.len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn keys_lists_saved_blobs_and_remove_deletes() {
        let dir = temp_dir("local-store-keys");
        let store = LocalStore::new(&dir);
        store.save("presets", &Vec::<String>::new());
        store.save("gameState", &SessionSnapshot::default());
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["gameState".to_string(), "presets".to_string()]);

        store.remove("presets");
        assert_eq!(store.keys(), vec!["gameState".to_string()]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let store = LocalStore::new("/tmp/x");
        assert_eq!(store.path_for("../evil"), PathBuf::from("/tmp/x/___evil.json"));
    }
}
