//! Password verifier stored next to the cache.
//!
//! Lets the launcher check a master password locally before trying to decrypt
//! the cache, without ever storing the password or the cache key.

use std::path::Path;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::kdf;
use super::storage::{remove_if_exists, write_private_json};
use super::CacheResult;

pub const VERIFIER_FILE_NAME: &str = "password-hash.json";

const HASH_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordVerifier {
    pub salt: String,
    pub hash: String,
}

impl PasswordVerifier {
    pub fn create(password: &str) -> CacheResult<Self> {
        let salt = kdf::generate_salt();
        let hash = kdf::derive::<HASH_SIZE>(password, &salt)?;
        Ok(Self {
            salt,
            hash: hex::encode(&hash[..]),
        })
    }

    /// Constant-time check of `password` against the stored hash.
    pub fn matches(&self, password: &str) -> bool {
        let Ok(expected) = hex::decode(&self.hash) else {
            return false;
        };
        if expected.len() != HASH_SIZE {
            return false;
        }
        match kdf::derive::<HASH_SIZE>(password, &self.salt) {
            Ok(actual) => actual[..].ct_eq(&expected[..]).into(),
            Err(_) => false,
        }
    }
}

pub fn load_verifier(dir: &Path) -> Option<PasswordVerifier> {
    let path = dir.join(VERIFIER_FILE_NAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            debug!("No password verifier at {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(verifier) => Some(verifier),
        Err(e) => {
            debug!("Password verifier is malformed: {}", e);
            None
        }
    }
}

pub fn save_verifier(dir: &Path, verifier: &PasswordVerifier) -> CacheResult<()> {
    write_private_json(&dir.join(VERIFIER_FILE_NAME), verifier)
}

pub fn delete_verifier(dir: &Path) -> std::io::Result<()> {
    remove_if_exists(&dir.join(VERIFIER_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_shape() {
        let verifier = PasswordVerifier::create("master").unwrap();
        assert_eq!(verifier.hash.len(), 128);
        assert_eq!(verifier.salt.len(), 32);
    }

    #[test]
    fn test_verifier_matches_only_same_password() {
        let verifier = PasswordVerifier::create("master").unwrap();
        assert!(verifier.matches("master"));
        assert!(!verifier.matches("master "));
        assert!(!verifier.matches(""));
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        let mut verifier = PasswordVerifier::create("master").unwrap();
        verifier.hash = "not hex".into();
        assert!(!verifier.matches("master"));

        verifier.hash = "abcd".into();
        assert!(!verifier.matches("master"));
    }

    #[test]
    fn test_file_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_verifier(dir.path()).is_none());

        let verifier = PasswordVerifier::create("master").unwrap();
        save_verifier(dir.path(), &verifier).unwrap();
        assert!(load_verifier(dir.path()).unwrap().matches("master"));

        delete_verifier(dir.path()).unwrap();
        assert!(load_verifier(dir.path()).is_none());
        delete_verifier(dir.path()).unwrap();
    }

    #[test]
    fn test_garbage_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VERIFIER_FILE_NAME), "{\"salt\":1}").unwrap();
        assert!(load_verifier(dir.path()).is_none());
    }
}
