// Token payloads: signed access-token claims and the JSON records kept in
// the key-value store for refresh and one-time tokens.

use serde::{Deserialize, Serialize};

/// Claims carried by a signed access token (HS256). Timestamps are Unix
/// epoch seconds; the jti is a 256-bit random identifier used as the
/// revocation key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// User id (subject)
    pub sub: i64,

    /// Role granted to the subject
    pub role_id: i32,

    /// Issued at (Unix epoch seconds)
    pub iat: i64,

    /// Expires at (Unix epoch seconds)
    pub exp: i64,

    /// Unique token id, URL-safe encoded
    pub jti: String,
}

impl AccessTokenClaims {
    /// Remaining lifetime in milliseconds at `now_ms`; zero when expired.
    pub fn remaining_ttl_ms(&self, now_ms: i64) -> i64 {
        (self.exp * 1_000 - now_ms).max(0)
    }
}

/// Record stored under `refresh_token:<sha256(secret)>`. Timestamps are
/// Unix epoch milliseconds; the store TTL matches `expires_at` so record
/// existence and validity are equivalent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    pub user_id: i64,
    pub role_id: i32,
    pub created_at: i64,
    pub expires_at: i64,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Record stored under a one-time-token namespace key. The raw secret is
/// only ever transmitted inside the published event URL; the store key is
/// its hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneTimeTokenRecord {
    pub user_id: i64,
    pub email: String,
    pub created_at: i64,
}
