//! On-disk format of the encrypted item cache.
//!
//! ```json
//! { "salt": "<hex>", "iv": "<hex, 16 bytes>", "tag": "<hex, 16 bytes>", "data": "<hex>" }
//! ```
//!
//! `data` is the AES-256-GCM ciphertext of the JSON item array. Files written
//! before encryption was introduced hold the plain item array and are still
//! accepted on read.

use std::io::Write;
use std::path::Path;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::kdf;
use super::{CacheError, CacheResult};
use crate::items::VaultItem;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const CACHE_FILE_NAME: &str = "vault-cache.json";

const IV_SIZE: usize = 16;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// A derived cache key together with the salt it was derived with.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CacheKey {
    key: [u8; KEY_SIZE],
    salt: String,
}

impl CacheKey {
    /// Derive a key under a fresh random salt.
    pub fn derive(password: &str) -> CacheResult<Self> {
        Self::derive_with_salt(password, &kdf::generate_salt())
    }

    pub fn derive_with_salt(password: &str, salt: &str) -> CacheResult<Self> {
        let derived = kdf::derive::<KEY_SIZE>(password, salt)?;
        Ok(Self {
            key: *derived,
            salt: salt.to_string(),
        })
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    fn cipher(&self) -> CacheResult<Aes256Gcm16> {
        Aes256Gcm16::new_from_slice(&self.key)
            .map_err(|e| CacheError::Encryption(format!("Invalid key: {}", e)))
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKey")
            .field("key", &"[REDACTED]")
            .field("salt", &self.salt)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub salt: String,
    pub iv: String,
    pub tag: String,
    pub data: String,
}

/// Everything that may be found in the cache file.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum StoredCache {
    Legacy(Vec<VaultItem>),
    Encrypted(CacheEnvelope),
}

/// Encrypt `items` under `key`.
pub fn encrypt_items(items: &[VaultItem], key: &CacheKey) -> CacheResult<CacheEnvelope> {
    let mut buffer = Zeroizing::new(serde_json::to_vec(items)?);

    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let tag = key
        .cipher()?
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer[..])
        .map_err(|e| CacheError::Encryption(format!("Encryption failed: {}", e)))?;

    Ok(CacheEnvelope {
        salt: key.salt().to_string(),
        iv: hex::encode(iv),
        tag: hex::encode(tag),
        data: hex::encode(&buffer[..]),
    })
}

fn decode_exact(field: &str, value: &str, len: usize) -> CacheResult<Vec<u8>> {
    let bytes = hex::decode(value)
        .map_err(|e| CacheError::InvalidFormat(format!("{} is not hex: {}", field, e)))?;
    if bytes.len() != len {
        return Err(CacheError::InvalidFormat(format!(
            "{} has {} bytes, expected {}",
            field,
            bytes.len(),
            len
        )));
    }
    Ok(bytes)
}

/// Re-derive the key from `password` and the envelope's salt, then decrypt.
pub fn decrypt_envelope(envelope: &CacheEnvelope, password: &str) -> CacheResult<Vec<VaultItem>> {
    let iv = decode_exact("iv", &envelope.iv, IV_SIZE)?;
    let tag = decode_exact("tag", &envelope.tag, TAG_SIZE)?;
    let mut buffer = Zeroizing::new(
        hex::decode(&envelope.data)
            .map_err(|e| CacheError::InvalidFormat(format!("data is not hex: {}", e)))?,
    );

    let key = CacheKey::derive_with_salt(password, &envelope.salt)?;
    key.cipher()?
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&iv),
            b"",
            &mut buffer[..],
            Tag::from_slice(&tag),
        )
        .map_err(|_| CacheError::Decryption)?;

    Ok(serde_json::from_slice(&buffer[..])?)
}

/// Write JSON to `path` through a temp file and rename, owner-only on Unix.
pub(crate) fn write_private_json<T: Serialize>(path: &Path, value: &T) -> CacheResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = Zeroizing::new(serde_json::to_vec_pretty(value)?);
    let temp_path = path.with_extension("json.tmp");

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = options
        .open(&temp_path)
        .and_then(|mut file| {
            file.write_all(&contents[..])?;
            file.sync_all()
        })
        .and_then(|_| std::fs::rename(&temp_path, path));

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Delete `path`; a missing file is not an error.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<VaultItem> {
        vec![VaultItem {
            id: "1".into(),
            name: "GitHub".into(),
            username: "octo".into(),
            password: "hunter2".into(),
            uri: "https://github.com".into(),
            notes: String::new(),
            folder_id: None,
        }]
    }

    #[test]
    fn test_envelope_layout() {
        let key = CacheKey::derive("master").unwrap();
        let envelope = encrypt_items(&items(), &key).unwrap();
        assert_eq!(envelope.salt, key.salt());
        assert_eq!(envelope.iv.len(), IV_SIZE * 2);
        assert_eq!(envelope.tag.len(), TAG_SIZE * 2);
        assert!(!envelope.data.contains(&hex::encode("hunter2")));
    }

    #[test]
    fn test_decrypt_with_right_and_wrong_password() {
        let key = CacheKey::derive("master").unwrap();
        let envelope = encrypt_items(&items(), &key).unwrap();

        assert_eq!(decrypt_envelope(&envelope, "master").unwrap(), items());
        assert!(matches!(
            decrypt_envelope(&envelope, "Master"),
            Err(CacheError::Decryption)
        ));
    }

    #[test]
    fn test_bad_lengths_are_rejected_before_decrypting() {
        let key = CacheKey::derive("master").unwrap();
        let mut envelope = encrypt_items(&items(), &key).unwrap();
        envelope.iv = "abcd".into();
        assert!(matches!(
            decrypt_envelope(&envelope, "master"),
            Err(CacheError::InvalidFormat(_))
        ));

        let mut envelope = encrypt_items(&items(), &key).unwrap();
        envelope.tag = "zz".repeat(16);
        assert!(matches!(
            decrypt_envelope(&envelope, "master"),
            Err(CacheError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_stored_cache_accepts_both_formats() {
        let legacy: StoredCache =
            serde_json::from_str(r#"[{"id":"1","name":"Old","password":"p"}]"#).unwrap();
        assert!(matches!(legacy, StoredCache::Legacy(ref v) if v.len() == 1));

        let encrypted: StoredCache =
            serde_json::from_str(r#"{"salt":"aa","iv":"bb","tag":"cc","data":"dd"}"#).unwrap();
        assert!(matches!(encrypted, StoredCache::Encrypted(_)));

        assert!(serde_json::from_str::<StoredCache>(r#"{"salt":"aa"}"#).is_err());
    }

    #[test]
    fn test_cache_key_debug_is_redacted() {
        let key = CacheKey::derive_with_salt("master", "00").unwrap();
        let printed = format!("{:?}", key);
        assert!(printed.contains("REDACTED"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_json_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_private_json(&path, &serde_json::json!({"a": 1})).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("json.tmp").exists());

        remove_if_exists(&path).unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
