//! Encrypted local cache of vault items.
//!
//! The item list is encrypted with AES-256-GCM under a key derived from the
//! master password (scrypt), so a previously seen vault can be searched
//! before the live unlock finishes. A separate scrypt verifier lets the
//! password be checked without touching the cache.
//!
//! Reads never fail: a missing, tampered or undecryptable cache is treated as
//! an empty one and the caller falls back to a live listing.

mod error;
mod kdf;
mod manager;
mod storage;
mod verifier;

pub use error::{CacheError, CacheResult};
pub use manager::CacheStore;
pub use storage::{CacheEnvelope, CacheKey, CACHE_FILE_NAME};
pub use verifier::{PasswordVerifier, VERIFIER_FILE_NAME};
