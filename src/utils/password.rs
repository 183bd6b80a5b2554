// Password hashing and verification using bcrypt with per-hash salts.
// Verification is constant-time in the hash comparison and distinguishes a
// mismatch from an internal failure so login can map them to 401 and 500.

use thiserror::Error;

/// Adaptive work factor. 12 keeps a single verification in the tens of
/// milliseconds on current hardware.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hashing(String),

    #[error("invalid password hash format")]
    InvalidHashFormat,

    #[error("failed to verify password: {0}")]
    Verification(String),
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(password, cost).map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// `Ok(true)` on a match, `Ok(false)` on a mismatch, `Err` on malformed
/// hashes or backend failure.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    match bcrypt::verify(password, hash) {
        Ok(matched) => Ok(matched),
        Err(bcrypt::BcryptError::InvalidHash(_)) => Err(PasswordError::InvalidHashFormat),
        Err(e) => Err(PasswordError::Verification(e.to_string())),
    }
}
