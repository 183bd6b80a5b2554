// Token engine: HS256-signed access tokens, opaque refresh tokens kept in
// the key-value store by secret hash, and the self-pruning revocation set.

use std::sync::Arc;

use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::warn;

use crate::models::auth::{AccessTokenClaims, RefreshTokenRecord};
use crate::store::{Clock, KeyValueStore, StoreError};
use crate::utils::secrets::{generate_token_secret, hash_token_secret};

const REFRESH_KEY_PREFIX: &str = "refresh_token:";
const BLACKLIST_KEY_PREFIX: &str = "blacklist:access_token:";

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("signing secret is not configured")]
    MissingSecret,

    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,

    #[error("refresh token not found")]
    NotFound,

    #[error("token encoding error: {0}")]
    Encoding(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl crate::services::circuit_breaker::BreakerError for TokenError {
    fn is_dependency_failure(&self) -> bool {
        matches!(self, TokenError::Store(_))
    }
}

#[derive(Clone)]
pub struct TokenEngineConfig {
    pub jwt_secret: String,
    /// Access-token lifetime in seconds (default 15 minutes).
    pub access_ttl_secs: u64,
    /// Refresh-token lifetime in seconds (default 7 days).
    pub refresh_ttl_secs: u64,
}

impl std::fmt::Debug for TokenEngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEngineConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}

pub struct TokenEngine {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_ms: u64,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TokenEngine {
    pub fn new(
        config: TokenEngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        if config.jwt_secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_ms: config.refresh_ttl_secs * 1_000,
            store,
            clock,
        })
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    /// Sign a fresh access token for the subject.
    pub fn issue_access(&self, user_id: i64, role_id: i32) -> Result<String, TokenError> {
        let now_secs = self.clock.now_ms() / 1_000;
        let claims = AccessTokenClaims {
            sub: user_id,
            role_id,
            iat: now_secs,
            exp: now_secs + self.access_ttl_secs as i64,
            jti: generate_token_secret(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Parse and verify an access token: HMAC only, valid signature, not
    /// expired, not revoked. A store failure never lets a token through.
    pub async fn validate_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Invalid)?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::Invalid);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = 0;

        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;

        if !data.claims.jti.is_empty() {
            let key = format!("{}{}", BLACKLIST_KEY_PREFIX, data.claims.jti);
            if self.store.exists(&key).await? {
                return Err(TokenError::Revoked);
            }
        }

        Ok(data.claims)
    }

    /// Add a still-valid token's jti to the revocation set. The entry's TTL
    /// is the token's remaining lifetime, so the set prunes itself.
    pub async fn blacklist(&self, token: &str) -> Result<(), TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::Invalid)?;

        let remaining_ms = data.claims.remaining_ttl_ms(self.clock.now_ms());
        if remaining_ms <= 0 {
            return Ok(());
        }

        let key = format!("{}{}", BLACKLIST_KEY_PREFIX, data.claims.jti);
        self.store.set_px(&key, "1", remaining_ms as u64).await?;
        Ok(())
    }

    /// Mint an opaque refresh secret and persist its record with the
    /// refresh TTL. Only the secret's hash is used as the store key.
    pub async fn generate_refresh(
        &self,
        user_id: i64,
        role_id: i32,
    ) -> Result<(String, RefreshTokenRecord), TokenError> {
        let secret = generate_token_secret();
        let now = self.clock.now_ms();
        let record = RefreshTokenRecord {
            user_id,
            role_id,
            created_at: now,
            expires_at: now + self.refresh_ttl_ms as i64,
        };

        let payload =
            serde_json::to_string(&record).map_err(|e| TokenError::Encoding(e.to_string()))?;
        self.store
            .set_px(&refresh_key(&secret), &payload, self.refresh_ttl_ms)
            .await?;

        Ok((secret, record))
    }

    /// Look up a refresh secret. Missing records are `NotFound`; a record
    /// past its expiry is deleted and reported `Expired`.
    pub async fn validate_refresh(&self, secret: &str) -> Result<RefreshTokenRecord, TokenError> {
        let key = refresh_key(secret);
        let raw = self.store.get(&key).await?.ok_or(TokenError::NotFound)?;
        let record: RefreshTokenRecord =
            serde_json::from_str(&raw).map_err(|e| TokenError::Encoding(e.to_string()))?;

        if record.is_expired(self.clock.now_ms()) {
            let _ = self.store.del(&key).await;
            return Err(TokenError::Expired);
        }

        Ok(record)
    }

    /// Validate-then-delete-then-generate. Concurrent rotations of the same
    /// secret race on the delete; the loser observes a missing record and
    /// must re-login.
    pub async fn rotate_refresh(
        &self,
        secret: &str,
    ) -> Result<(String, RefreshTokenRecord), TokenError> {
        let record = self.validate_refresh(secret).await?;

        if !self.store.del(&refresh_key(secret)).await? {
            return Err(TokenError::NotFound);
        }

        self.generate_refresh(record.user_id, record.role_id).await
    }

    /// Best-effort removal; idempotent, errors surface to callers that only
    /// log them.
    pub async fn delete_refresh(&self, secret: &str) -> Result<(), TokenError> {
        if let Err(e) = self.store.del(&refresh_key(secret)).await {
            warn!("failed to delete refresh token record: {}", e);
            return Err(TokenError::Store(e));
        }
        Ok(())
    }
}

fn refresh_key(secret: &str) -> String {
    format!("{}{}", REFRESH_KEY_PREFIX, hash_token_secret(secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use base64::prelude::*;

    fn test_engine() -> (TokenEngine, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let engine = TokenEngine::new(
            TokenEngineConfig {
                jwt_secret: "unit-test-signing-secret-at-least-32-chars".to_string(),
                access_ttl_secs: 900,
                refresh_ttl_secs: 604_800,
            },
            store.clone(),
            clock.clone(),
        )
        .expect("engine");
        (engine, store, clock)
    }

    #[test]
    fn empty_secret_is_rejected_at_construction() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let result = TokenEngine::new(
            TokenEngineConfig {
                jwt_secret: String::new(),
                access_ttl_secs: 900,
                refresh_ttl_secs: 604_800,
            },
            store,
            clock,
        );
        assert!(matches!(result, Err(TokenError::MissingSecret)));
    }

    #[tokio::test]
    async fn access_token_roundtrip_preserves_subject_and_role() {
        let (engine, _, _) = test_engine();
        let token = engine.issue_access(42, 2).unwrap();

        let claims = engine.validate_access(&token).await.unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role_id, 2);
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.jti.len(), 43);
    }

    #[tokio::test]
    async fn tampered_token_fails_validation() {
        let (engine, _, _) = test_engine();
        let token = engine.issue_access(1, 1).unwrap();

        // flip one byte in the payload segment
        let mut bytes = token.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert!(matches!(
            engine.validate_access(&tampered).await,
            Err(TokenError::Invalid | TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn non_hmac_algorithm_is_rejected() {
        let (engine, _, clock) = test_engine();
        let now_secs = clock.now_ms() / 1_000;
        let claims = AccessTokenClaims {
            sub: 1,
            role_id: 1,
            iat: now_secs,
            exp: now_secs + 900,
            jti: "j".to_string(),
        };

        // same payload signed with RS256 must not be accepted; the header
        // check fires before any signature work
        let rsa_token = format!(
            "{}.{}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
            BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
            "c2lnbmF0dXJl"
        );
        assert!(matches!(
            engine.validate_access(&rsa_token).await,
            Err(TokenError::Invalid)
        ));
    }

    #[tokio::test]
    async fn expired_access_token_is_reported_expired() {
        let (engine, _, clock) = test_engine();
        clock.advance_ms(-3_600_000);
        let token = engine.issue_access(1, 1).unwrap();
        clock.advance_ms(3_600_000);

        assert!(matches!(
            engine.validate_access(&token).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn blacklisted_token_is_revoked_but_fresh_tokens_pass() {
        let (engine, _, _) = test_engine();
        let token = engine.issue_access(7, 1).unwrap();
        engine.validate_access(&token).await.unwrap();

        engine.blacklist(&token).await.unwrap();
        assert!(matches!(
            engine.validate_access(&token).await,
            Err(TokenError::Revoked)
        ));

        let fresh = engine.issue_access(7, 1).unwrap();
        assert!(engine.validate_access(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn blacklisting_an_expired_token_is_a_noop() {
        let (engine, store, clock) = test_engine();
        clock.advance_ms(-3_600_000);
        let token = engine.issue_access(1, 1).unwrap();
        clock.advance_ms(3_600_000);

        engine.blacklist(&token).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn blacklist_rejects_malformed_tokens() {
        let (engine, _, _) = test_engine();
        assert!(matches!(
            engine.blacklist("not.a.token").await,
            Err(TokenError::Invalid)
        ));
    }

    #[tokio::test]
    async fn refresh_rotation_is_single_use() {
        let (engine, _, _) = test_engine();
        let (s0, record) = engine.generate_refresh(42, 2).await.unwrap();
        assert_eq!(record.user_id, 42);

        let (s1, rotated) = engine.rotate_refresh(&s0).await.unwrap();
        assert_ne!(s0, s1);
        assert_eq!(rotated.user_id, 42);
        assert_eq!(rotated.role_id, 2);

        assert!(matches!(
            engine.validate_refresh(&s0).await,
            Err(TokenError::NotFound)
        ));
        assert!(engine.validate_refresh(&s1).await.is_ok());
    }

    #[tokio::test]
    async fn expired_refresh_record_is_deleted_on_validation() {
        let (engine, _, clock) = test_engine();
        let (secret, _) = engine.generate_refresh(1, 1).await.unwrap();

        clock.advance_ms(604_800_000 + 1);
        // the in-memory store has already dropped the entry with its TTL;
        // either way the secret is unusable afterwards
        assert!(matches!(
            engine.validate_refresh(&secret).await,
            Err(TokenError::NotFound | TokenError::Expired)
        ));
        assert!(matches!(
            engine.validate_refresh(&secret).await,
            Err(TokenError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_rotation_has_at_most_one_winner() {
        let (engine, _, _) = test_engine();
        let engine = Arc::new(engine);
        let (s0, _) = engine.generate_refresh(1, 1).await.unwrap();

        let (a, b) = tokio::join!(engine.rotate_refresh(&s0), engine.rotate_refresh(&s0));
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn delete_refresh_is_idempotent() {
        let (engine, _, _) = test_engine();
        let (secret, _) = engine.generate_refresh(1, 1).await.unwrap();

        engine.delete_refresh(&secret).await.unwrap();
        engine.delete_refresh(&secret).await.unwrap();
        assert!(matches!(
            engine.validate_refresh(&secret).await,
            Err(TokenError::NotFound)
        ));
    }

    #[tokio::test]
    async fn store_failure_never_admits_a_token() {
        let (engine, store, _) = test_engine();
        let token = engine.issue_access(1, 1).unwrap();

        store.set_failing(true);
        assert!(matches!(
            engine.validate_access(&token).await,
            Err(TokenError::Store(_))
        ));
    }
}
