// Opaque secret generation shared by the refresh-token and one-time-token
// paths: 256 bits of entropy, URL-safe encoding, SHA-256 store keys so raw
// secrets never land in the key-value store.

use base64::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// 256-bit cryptographically random secret, base64url without padding
/// (43 characters).
pub fn generate_token_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 of a secret; the only form used as a store key.
pub fn hash_token_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
