use thiserror::Error;

/// Errors from the encrypted item cache and password verifier.
///
/// Only the write paths surface these. Reads fail closed: a cache that cannot
/// be read is an empty cache, a verifier that cannot be read never matches.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Wrong password or tampered ciphertext; the two are indistinguishable.
    #[error("Cache could not be decrypted")]
    Decryption,

    #[error("Cache file is malformed: {0}")]
    InvalidFormat(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
