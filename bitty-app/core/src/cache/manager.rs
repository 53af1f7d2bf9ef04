use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::storage::{
    decrypt_envelope, encrypt_items, remove_if_exists, write_private_json, CacheKey, StoredCache,
    CACHE_FILE_NAME,
};
use super::verifier::{
    delete_verifier, load_verifier, save_verifier, PasswordVerifier, VERIFIER_FILE_NAME,
};
use super::CacheResult;
use crate::items::VaultItem;

/// Encrypted snapshot of the vault items plus the password verifier.
///
/// The cache key is only held while the vault is unlocked. Without it,
/// [`CacheStore::save`] does nothing.
#[derive(Debug)]
pub struct CacheStore {
    data_dir: PathBuf,
    key: Option<CacheKey>,
}

impl CacheStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            key: None,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE_NAME)
    }

    /// Derive and hold a key for writing, under a fresh salt.
    pub fn set_key(&mut self, password: &str) -> CacheResult<()> {
        self.key = Some(CacheKey::derive(password)?);
        debug!("Cache key derived");
        Ok(())
    }

    pub fn clear_key(&mut self) {
        if self.key.take().is_some() {
            debug!("Cache key discarded");
        }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt and persist `items`. Returns `false` when no key is held.
    pub fn save(&self, items: &[VaultItem]) -> CacheResult<bool> {
        let Some(key) = self.key.as_ref() else {
            debug!("No cache key, skipping cache write");
            return Ok(false);
        };
        let envelope = encrypt_items(items, key)?;
        write_private_json(&self.cache_path(), &envelope)?;
        info!("Saved {} items to the encrypted cache", items.len());
        Ok(true)
    }

    /// Read the cached items. Any failure yields an empty list.
    pub fn load(&self, password: &str) -> Vec<VaultItem> {
        let path = self.cache_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No cache at {:?}: {}", path, e);
                return Vec::new();
            }
        };

        let stored: StoredCache = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Cache file is not readable, ignoring it: {}", e);
                return Vec::new();
            }
        };

        match stored {
            StoredCache::Legacy(items) => {
                info!("Loaded {} items from an unencrypted legacy cache", items.len());
                items
            }
            StoredCache::Encrypted(envelope) => match decrypt_envelope(&envelope, password) {
                Ok(items) => {
                    info!("Loaded {} items from the encrypted cache", items.len());
                    items
                }
                Err(e) => {
                    debug!("Cache miss: {}", e);
                    Vec::new()
                }
            },
        }
    }

    /// Delete the cache file.
    pub fn clear(&self) {
        if let Err(e) = remove_if_exists(&self.cache_path()) {
            warn!("Failed to delete cache file: {}", e);
        }
    }

    pub fn save_password_hash(&self, password: &str) -> CacheResult<()> {
        let verifier = PasswordVerifier::create(password)?;
        save_verifier(&self.data_dir, &verifier)?;
        debug!("Password verifier saved");
        Ok(())
    }

    /// Whether a verifier file exists, readable or not.
    pub fn has_password_hash(&self) -> bool {
        self.data_dir.join(VERIFIER_FILE_NAME).exists()
    }

    pub fn verify_password(&self, password: &str) -> bool {
        load_verifier(&self.data_dir)
            .map(|verifier| verifier.matches(password))
            .unwrap_or(false)
    }

    pub fn clear_password_hash(&self) {
        if let Err(e) = delete_verifier(&self.data_dir) {
            warn!("Failed to delete password verifier: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str) -> VaultItem {
        VaultItem {
            id: id.into(),
            name: name.into(),
            username: "user".into(),
            password: "secret".into(),
            uri: String::new(),
            notes: String::new(),
            folder_id: None,
        }
    }

    #[test]
    fn test_save_without_key_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(!store.save(&[item("1", "a")]).unwrap());
        assert!(!store.cache_path().exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.set_key("master").unwrap();
        let items = vec![item("1", "GitHub"), item("2", "GitLab")];
        assert!(store.save(&items).unwrap());

        assert_eq!(store.load("master"), items);
        assert!(store.load("wrong").is_empty());
    }

    #[test]
    fn test_each_key_uses_a_fresh_salt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.set_key("master").unwrap();
        store.save(&[item("1", "a")]).unwrap();
        let first = std::fs::read_to_string(store.cache_path()).unwrap();

        store.set_key("master").unwrap();
        store.save(&[item("1", "a")]).unwrap();
        let second = std::fs::read_to_string(store.cache_path()).unwrap();

        let salt = |s: &str| serde_json::from_str::<serde_json::Value>(s).unwrap()["salt"].clone();
        assert_ne!(salt(&first), salt(&second));
    }

    #[test]
    fn test_legacy_array_is_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CACHE_FILE_NAME),
            r#"[{"id":"9","name":"Old entry","username":"u","password":"p","uri":"","notes":""}]"#,
        )
        .unwrap();
        let store = CacheStore::new(dir.path());
        let items = store.load("anything");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Old entry");
    }

    #[test]
    fn test_missing_or_garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(store.load("master").is_empty());

        std::fs::write(store.cache_path(), "not json").unwrap();
        assert!(store.load("master").is_empty());

        std::fs::write(store.cache_path(), r#"{"salt":"00","iv":"zz"}"#).unwrap();
        assert!(store.load("master").is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.set_key("master").unwrap();
        store.save(&[item("1", "a")]).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.cache_path()).unwrap()).unwrap();
        let data = envelope["data"].as_str().unwrap().to_string();
        let flipped = if data.starts_with('0') { "1" } else { "0" };
        envelope["data"] = serde_json::Value::String(format!("{}{}", flipped, &data[1..]));
        std::fs::write(store.cache_path(), envelope.to_string()).unwrap();

        assert!(store.load("master").is_empty());
    }

    #[test]
    fn test_clear_key_stops_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.set_key("master").unwrap();
        assert!(store.has_key());
        store.clear_key();
        assert!(!store.has_key());
        assert!(!store.save(&[item("1", "a")]).unwrap());
    }

    #[test]
    fn test_password_hash_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(!store.has_password_hash());
        assert!(!store.verify_password("master"));

        store.save_password_hash("master").unwrap();
        assert!(store.has_password_hash());
        assert!(store.verify_password("master"));
        assert!(!store.verify_password("other"));

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(VERIFIER_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["hash"].as_str().unwrap().len(), 128);
        assert_eq!(raw["salt"].as_str().unwrap().len(), 32);

        store.clear_password_hash();
        assert!(!store.has_password_hash());
        assert!(!store.verify_password("master"));
        store.clear_password_hash();
    }

    #[test]
    fn test_clear_removes_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.set_key("master").unwrap();
        store.save(&[item("1", "a")]).unwrap();
        store.clear();
        assert!(!store.cache_path().exists());
        assert!(store.load("master").is_empty());
        store.clear();
    }
}
