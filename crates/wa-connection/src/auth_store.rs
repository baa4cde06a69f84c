//! Filesystem-backed auth store.
//!
//! Layout inside the auth directory:
//!
//! ```text
//! creds.json
//! keys/<category>/<file-safe id>.json   {"id": "<original id>", "value": ...}
//! ```
//!
//! Key files keep the original id inside the file because the file-safe
//! name is not reversible.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crmlink_protocol::{KeySnapshot, KeyUpdates};

use crate::transport::AuthState;

const CREDS_FILE: &str = "creds.json";
const KEYS_DIR: &str = "keys";

/// Errors from auth store operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    id: String,
    value: serde_json::Value,
}

/// Persistent credential and key store for one WhatsApp device.
pub struct AuthStore {
    dir: PathBuf,
}

impl AuthStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns `true` if credentials have been saved.
    pub fn has_creds(&self) -> bool {
        self.creds_path().is_file()
    }

    /// Loads the stored auth material, creating an empty store if none
    /// exists. Missing credentials load as `{}`.
    pub fn load(&self) -> Result<AuthState, AuthStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let creds = self.read_creds()?;
        let keys = self.read_keys()?;
        debug!(
            dir = %self.dir.display(),
            has_creds = self.has_creds(),
            categories = keys.len(),
            "loaded auth state"
        );
        Ok(AuthState { creds, keys })
    }

    /// Merges a partial credential update into the stored creds and
    /// writes them back.
    pub fn save_creds(&self, update: &serde_json::Value) -> Result<(), AuthStoreError> {
        let mut creds = self.read_creds()?;
        merge_creds(&mut creds, update);
        std::fs::create_dir_all(&self.dir)?;
        let path = self.creds_path();
        std::fs::write(&path, serde_json::to_vec_pretty(&creds)?)?;
        set_permissions_0600(&path);
        debug!("persisted creds to {:?}", path);
        Ok(())
    }

    /// Writes or deletes key files. A `None` value deletes the key.
    pub fn apply_key_updates(&self, updates: &KeyUpdates) -> Result<(), AuthStoreError> {
        let mut written = 0usize;
        let mut removed = 0usize;
        for (category, entries) in updates {
            let cat_dir = self.dir.join(KEYS_DIR).join(file_safe(category));
            for (id, value) in entries {
                let path = cat_dir.join(format!("{}.json", file_safe(id)));
                match value {
                    Some(value) => {
                        std::fs::create_dir_all(&cat_dir)?;
                        let file = KeyFile {
                            id: id.clone(),
                            value: value.clone(),
                        };
                        std::fs::write(&path, serde_json::to_vec(&file)?)?;
                        set_permissions_0600(&path);
                        written += 1;
                    }
                    None => match std::fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    },
                }
            }
        }
        debug!(written, removed, "applied key updates");
        Ok(())
    }

    /// Deletes all persisted auth material and recreates the directory empty.
    pub fn clear(&self) -> Result<(), AuthStoreError> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), "cleared auth store");
        Ok(())
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    fn read_creds(&self) -> Result<serde_json::Value, AuthStoreError> {
        let path = self.creds_path();
        if !path.exists() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        let data = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn read_keys(&self) -> Result<KeySnapshot, AuthStoreError> {
        let mut snapshot = KeySnapshot::new();
        let keys_dir = self.dir.join(KEYS_DIR);
        if !keys_dir.is_dir() {
            return Ok(snapshot);
        }
        for cat_entry in std::fs::read_dir(&keys_dir)? {
            let cat_entry = cat_entry?;
            if !cat_entry.file_type()?.is_dir() {
                continue;
            }
            let category = cat_entry.file_name().to_string_lossy().into_owned();
            let entries = snapshot.entry(category).or_default();
            for key_entry in std::fs::read_dir(cat_entry.path())? {
                let path = key_entry?.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let data = std::fs::read(&path)?;
                match serde_json::from_slice::<KeyFile>(&data) {
                    Ok(file) => {
                        entries.insert(file.id, file.value);
                    }
                    Err(e) => warn!(path = %path.display(), "skipping unreadable key file: {e}"),
                }
            }
        }
        Ok(snapshot)
    }
}

/// Shallow merge: top-level fields of `update` overwrite those of `creds`.
/// A non-object on either side replaces `creds` wholesale.
fn merge_creds(creds: &mut serde_json::Value, update: &serde_json::Value) {
    match (creds.as_object_mut(), update.as_object()) {
        (Some(target), Some(fields)) => {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        _ => *creds = update.clone(),
    }
}

/// Makes a key id or category usable as a file name.
fn file_safe(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> (tempfile::TempDir, AuthStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStore::new(tmp.path().join("auth"));
        (tmp, store)
    }

    fn key_updates(category: &str, id: &str, value: Option<serde_json::Value>) -> KeyUpdates {
        let mut updates = KeyUpdates::new();
        updates
            .entry(category.to_string())
            .or_default()
            .insert(id.to_string(), value);
        updates
    }

    #[test]
    fn load_creates_empty_store() {
        let (_tmp, store) = test_store();
        let auth = store.load().unwrap();
        assert!(store.dir().is_dir());
        assert_eq!(auth.creds, json!({}));
        assert!(auth.keys.is_empty());
        assert!(!store.has_creds());
    }

    #[test]
    fn save_creds_merges_partial_updates() {
        let (_tmp, store) = test_store();
        store
            .save_creds(&json!({"registrationId": 42, "me": null}))
            .unwrap();
        store
            .save_creds(&json!({"me": {"id": "447911123456:3@s.whatsapp.net"}}))
            .unwrap();

        assert!(store.has_creds());
        let creds = store.load().unwrap().creds;
        assert_eq!(creds["registrationId"], 42);
        assert_eq!(creds["me"]["id"], "447911123456:3@s.whatsapp.net");
    }

    #[test]
    fn key_ids_survive_file_name_mangling() {
        let (_tmp, store) = test_store();
        let id = "447911123456:3.0";
        store
            .apply_key_updates(&key_updates("session", id, Some(json!({"rootKey": "abc"}))))
            .unwrap();

        let auth = store.load().unwrap();
        assert_eq!(auth.keys["session"][id], json!({"rootKey": "abc"}));
    }

    #[test]
    fn null_key_value_deletes() {
        let (_tmp, store) = test_store();
        store
            .apply_key_updates(&key_updates("pre-key", "7", Some(json!({"public": "x"}))))
            .unwrap();
        store
            .apply_key_updates(&key_updates("pre-key", "7", None))
            .unwrap();
        // Deleting a missing key is fine.
        store
            .apply_key_updates(&key_updates("pre-key", "8", None))
            .unwrap();

        let auth = store.load().unwrap();
        assert!(auth.keys.get("pre-key").is_none_or(|m| m.is_empty()));
    }

    #[test]
    fn clear_removes_everything() {
        let (_tmp, store) = test_store();
        store.save_creds(&json!({"registrationId": 1})).unwrap();
        store
            .apply_key_updates(&key_updates("pre-key", "1", Some(json!(1))))
            .unwrap();

        store.clear().unwrap();
        assert!(!store.has_creds());
        assert!(store.dir().is_dir());
        assert!(store.load().unwrap().keys.is_empty());

        // Idempotent.
        store.clear().unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn clear_on_missing_dir_creates_it() {
        let (_tmp, store) = test_store();
        assert!(!store.dir().exists());
        store.clear().unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn corrupt_creds_is_an_error() {
        let (_tmp, store) = test_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join(CREDS_FILE), "{not json").unwrap();
        assert!(matches!(store.load(), Err(AuthStoreError::Json(_))));
    }

    #[test]
    fn merge_replaces_non_objects() {
        let mut creds = json!("legacy");
        merge_creds(&mut creds, &json!({"a": 1}));
        assert_eq!(creds, json!({"a": 1}));
    }

    #[test]
    fn file_safe_names() {
        assert_eq!(file_safe("a/b:c"), "a__b-c");
        assert_eq!(file_safe("app-state-sync-key"), "app-state-sync-key");
    }
}
