//! scrypt key derivation for the cache key and the password verifier.
//!
//! The salt is stored on disk as hex, and it is the hex text (not the decoded
//! bytes) that goes into scrypt. Existing cache files depend on this.

use rand::RngCore;
use zeroize::Zeroizing;

use super::{CacheError, CacheResult};

/// scrypt cost: N = 2^14.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

const SALT_BYTES: usize = 16;

/// Derive `N` bytes from `password` and the hex salt string.
pub(crate) fn derive<const N: usize>(password: &str, salt_hex: &str) -> CacheResult<Zeroizing<[u8; N]>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, N)
        .map_err(|e| CacheError::KeyDerivation(e.to_string()))?;

    let mut out = Zeroizing::new([0u8; N]);
    scrypt::scrypt(password.as_bytes(), salt_hex.as_bytes(), &params, &mut out[..])
        .map_err(|e| CacheError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

/// 16 random bytes, hex encoded.
pub(crate) fn generate_salt() -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut salt);
    hex::encode(salt)
}
