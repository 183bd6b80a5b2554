// Single-use tokens for email verification and password reset. Two disjoint
// key namespaces, hashed lookup keys, and atomic consumption so a racing
// second consumer always observes not-found.

use std::sync::Arc;

use thiserror::Error;

use crate::models::auth::OneTimeTokenRecord;
use crate::store::{Clock, KeyValueStore, StoreError};
use crate::utils::secrets::{generate_token_secret, hash_token_secret};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneTimeTokenKind {
    EmailVerification,
    PasswordReset,
}

impl OneTimeTokenKind {
    fn key_prefix(&self) -> &'static str {
        match self {
            OneTimeTokenKind::EmailVerification => "email_verification:",
            OneTimeTokenKind::PasswordReset => "password_reset:",
        }
    }

    fn url_path(&self) -> &'static str {
        match self {
            OneTimeTokenKind::EmailVerification => "/verify-email",
            OneTimeTokenKind::PasswordReset => "/reset-password",
        }
    }
}

#[derive(Error, Debug)]
pub enum OneTimeTokenError {
    #[error("token not found")]
    NotFound,

    #[error("token encoding error: {0}")]
    Encoding(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl crate::services::circuit_breaker::BreakerError for OneTimeTokenError {
    fn is_dependency_failure(&self) -> bool {
        matches!(self, OneTimeTokenError::Store(_))
    }
}

#[derive(Debug, Clone)]
pub struct OneTimeTokenConfig {
    /// Verification tokens live for 24 hours.
    pub verify_ttl_ms: u64,
    /// Reset tokens live for 1 hour.
    pub reset_ttl_ms: u64,
}

impl Default for OneTimeTokenConfig {
    fn default() -> Self {
        Self {
            verify_ttl_ms: 24 * 60 * 60 * 1_000,
            reset_ttl_ms: 60 * 60 * 1_000,
        }
    }
}

/// An issued token: the raw secret plus the URL suffix embedded in the
/// published event. The secret is never stored, only its hash.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub secret: String,
    pub url_suffix: String,
}

pub struct OneTimeTokenStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: OneTimeTokenConfig,
}

impl OneTimeTokenStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: OneTimeTokenConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn ttl_ms(&self, kind: OneTimeTokenKind) -> u64 {
        match kind {
            OneTimeTokenKind::EmailVerification => self.config.verify_ttl_ms,
            OneTimeTokenKind::PasswordReset => self.config.reset_ttl_ms,
        }
    }

    fn key(kind: OneTimeTokenKind, secret: &str) -> String {
        format!("{}{}", kind.key_prefix(), hash_token_secret(secret))
    }

    pub async fn issue(
        &self,
        kind: OneTimeTokenKind,
        user_id: i64,
        email: &str,
    ) -> Result<IssuedToken, OneTimeTokenError> {
        let secret = generate_token_secret();
        let record = OneTimeTokenRecord {
            user_id,
            email: email.to_string(),
            created_at: self.clock.now_ms(),
        };

        let payload = serde_json::to_string(&record)
            .map_err(|e| OneTimeTokenError::Encoding(e.to_string()))?;
        self.store
            .set_px(&Self::key(kind, &secret), &payload, self.ttl_ms(kind))
            .await?;

        let url_suffix = format!("{}?token={}", kind.url_path(), secret);
        Ok(IssuedToken { secret, url_suffix })
    }

    /// First successful call returns the record and deletes it; every later
    /// call observes not-found.
    pub async fn consume(
        &self,
        kind: OneTimeTokenKind,
        secret: &str,
    ) -> Result<OneTimeTokenRecord, OneTimeTokenError> {
        let raw = self
            .store
            .get_del(&Self::key(kind, secret))
            .await?
            .ok_or(OneTimeTokenError::NotFound)?;
        serde_json::from_str(&raw).map_err(|e| OneTimeTokenError::Encoding(e.to_string()))
    }

    /// Non-consuming lookup, for diagnostic flows only.
    pub async fn peek(
        &self,
        kind: OneTimeTokenKind,
        secret: &str,
    ) -> Result<OneTimeTokenRecord, OneTimeTokenError> {
        let raw = self
            .store
            .get(&Self::key(kind, secret))
            .await?
            .ok_or(OneTimeTokenError::NotFound)?;
        serde_json::from_str(&raw).map_err(|e| OneTimeTokenError::Encoding(e.to_string()))
    }
}
