// Credential workflows: registration, login, refresh, logout, email
// verification and both password-reset paths, orchestrated over the token
// engine, one-time tokens, credential verifier, user store and publisher.
// Calls that traverse the key-value store or the broker run through their
// circuit breakers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::models::user::{NewUser, User, UserStore, UserStoreError, DEFAULT_ROLE_ID};
use crate::services::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::services::events::{AuthEvent, EventPublisher};
use crate::services::one_time::{OneTimeTokenError, OneTimeTokenKind, OneTimeTokenStore};
use crate::services::token::{TokenEngine, TokenError};
use crate::utils::auth_errors::AuthError;
use crate::utils::password::{hash_password, verify_password};

#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    /// Base URL the one-time-token links are built against.
    pub frontend_base_url: String,
    pub bcrypt_cost: u32,
    /// Sleep applied to the silent forgot-password paths so their timing
    /// matches the issuing path.
    pub enumeration_delay_ms: u64,
}

/// A freshly established session: signed access token, opaque refresh
/// secret, and the profile the edge returns to the client.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_secret: String,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenEngine>,
    one_time: Arc<OneTimeTokenStore>,
    publisher: Arc<dyn EventPublisher>,
    store_breaker: Arc<CircuitBreaker>,
    broker_breaker: Arc<CircuitBreaker>,
    config: AuthServiceConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenEngine>,
        one_time: Arc<OneTimeTokenStore>,
        publisher: Arc<dyn EventPublisher>,
        store_breaker: Arc<CircuitBreaker>,
        broker_breaker: Arc<CircuitBreaker>,
        config: AuthServiceConfig,
    ) -> Self {
        Self {
            users,
            tokens,
            one_time,
            publisher,
            store_breaker,
            broker_breaker,
            config,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenEngine> {
        &self.tokens
    }

    fn absolute_url(&self, suffix: &str) -> String {
        format!("{}{}", self.config.frontend_base_url.trim_end_matches('/'), suffix)
    }

    /// Publish through the broker breaker; failures are logged, never
    /// surfaced to the caller.
    async fn publish_best_effort(&self, ctx: &RequestContext, event: AuthEvent) {
        let routing_key = event.routing_key();
        if let Err(e) = self.broker_breaker.call(self.publisher.publish(ctx, event)).await {
            warn!(routing_key, "event publish failed: {}", e);
        }
    }

    /// Create the account, issue a verification token and announce it. The
    /// response never includes tokens; the client must verify and log in.
    pub async fn register(
        &self,
        ctx: &RequestContext,
        input: RegisterInput,
    ) -> Result<(), AuthError> {
        match self.users.get_by_email(&input.email).await {
            Ok(_) => {
                return Err(AuthError::conflict(
                    "an account with this email address already exists",
                ))
            }
            Err(UserStoreError::NotFound) => {}
            Err(e) => return Err(AuthError::internal(e)),
        }

        let password_hash =
            hash_password(&input.password, self.config.bcrypt_cost).map_err(AuthError::internal)?;

        let user = self
            .users
            .create(NewUser {
                email: input.email,
                username: input.username,
                password_hash,
                role_id: DEFAULT_ROLE_ID,
            })
            .await
            .map_err(|e| match e {
                UserStoreError::Duplicate => {
                    AuthError::conflict("an account with this email address already exists")
                }
                e => AuthError::internal(e),
            })?;

        let issued = self
            .store_breaker
            .call(
                self.one_time
                    .issue(OneTimeTokenKind::EmailVerification, user.id, &user.email),
            )
            .await
            .map_err(AuthError::internal)?;

        self.publish_best_effort(
            ctx,
            AuthEvent::EmailVerification {
                email: user.email.clone(),
                verification_url: self.absolute_url(&issued.url_suffix),
            },
        )
        .await;

        info!(user_id = user.id, "new user registered");
        Ok(())
    }

    pub async fn login(
        &self,
        _ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<SessionTokens, AuthError> {
        let user = self.users.get_by_email(email).await.map_err(|e| match e {
            UserStoreError::NotFound => AuthError::not_found("user not found"),
            e => AuthError::internal(e),
        })?;

        match verify_password(password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => return Err(AuthError::unauthorized("invalid credentials")),
            Err(e) => return Err(AuthError::internal(e)),
        }

        let (refresh_secret, _) = self
            .store_breaker
            .call(self.tokens.generate_refresh(user.id, user.role_id))
            .await
            .map_err(AuthError::internal)?;

        let access_token = self
            .tokens
            .issue_access(user.id, user.role_id)
            .map_err(AuthError::internal)?;

        info!(user_id = user.id, "login successful");
        Ok(SessionTokens {
            access_token,
            refresh_secret,
            user,
        })
    }

    /// Rotate the refresh secret and mint a new access token. Missing and
    /// expired records are indistinguishable to the caller: the session is
    /// gone either way.
    pub async fn refresh(
        &self,
        _ctx: &RequestContext,
        refresh_secret: &str,
    ) -> Result<SessionTokens, AuthError> {
        let (new_secret, record) = match self
            .store_breaker
            .call(self.tokens.rotate_refresh(refresh_secret))
            .await
        {
            Ok(rotated) => rotated,
            Err(CircuitError::Open) => {
                return Err(AuthError::internal("token store unavailable"))
            }
            Err(CircuitError::Inner(TokenError::Store(e))) => return Err(AuthError::internal(e)),
            Err(CircuitError::Inner(_)) => {
                return Err(AuthError::unauthorized("invalid or expired refresh token"))
            }
        };

        let access_token = self
            .tokens
            .issue_access(record.user_id, record.role_id)
            .map_err(AuthError::internal)?;

        let user = self
            .users
            .get_by_id(record.user_id)
            .await
            .map_err(|e| match e {
                UserStoreError::NotFound => {
                    AuthError::unauthorized("invalid or expired refresh token")
                }
                e => AuthError::internal(e),
            })?;

        Ok(SessionTokens {
            access_token,
            refresh_secret: new_secret,
            user,
        })
    }

    /// Revoke the presented access token and drop the refresh record if one
    /// accompanies it. Refresh deletion is best-effort.
    pub async fn logout(
        &self,
        _ctx: &RequestContext,
        access_token: &str,
        refresh_secret: Option<&str>,
    ) -> Result<(), AuthError> {
        let claims = match self
            .store_breaker
            .call(self.tokens.validate_access(access_token))
            .await
        {
            Ok(claims) => claims,
            Err(CircuitError::Open) => {
                return Err(AuthError::internal("token store unavailable"))
            }
            Err(CircuitError::Inner(TokenError::Store(e))) => return Err(AuthError::internal(e)),
            Err(CircuitError::Inner(_)) => {
                return Err(AuthError::unauthorized("invalid or expired access token"))
            }
        };

        self.store_breaker
            .call(self.tokens.blacklist(access_token))
            .await
            .map_err(AuthError::internal)?;

        if let Some(secret) = refresh_secret {
            if let Err(e) = self.store_breaker.call(self.tokens.delete_refresh(secret)).await {
                warn!(user_id = claims.sub, "refresh cleanup on logout failed: {}", e);
            }
        }

        info!(user_id = claims.sub, "logout successful");
        Ok(())
    }

    /// Consume the verification token and mark the account verified.
    /// Re-verification of an already-verified account is a success.
    pub async fn verify_email(&self, _ctx: &RequestContext, token: &str) -> Result<(), AuthError> {
        let record = match self
            .store_breaker
            .call(self.one_time.consume(OneTimeTokenKind::EmailVerification, token))
            .await
        {
            Ok(record) => record,
            Err(CircuitError::Inner(OneTimeTokenError::NotFound)) => {
                return Err(AuthError::unauthorized(
                    "invalid or expired verification token",
                ))
            }
            Err(e) => return Err(AuthError::internal(e)),
        };

        let mut user = self
            .users
            .get_by_email(&record.email)
            .await
            .map_err(|e| match e {
                UserStoreError::NotFound => {
                    AuthError::unauthorized("invalid or expired verification token")
                }
                e => AuthError::internal(e),
            })?;

        if user.is_email_verified {
            return Ok(());
        }

        user.is_email_verified = true;
        self.users.update(&user).await.map_err(AuthError::internal)?;

        info!(user_id = user.id, "email verified");
        Ok(())
    }

    /// Authenticated variant: the caller proves who they are, but the email
    /// must already be verified before a reset link goes out.
    pub async fn request_password_reset(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> Result<(), AuthError> {
        let user = self.users.get_by_id(user_id).await.map_err(|e| match e {
            UserStoreError::NotFound => AuthError::unauthorized("invalid session"),
            e => AuthError::internal(e),
        })?;

        if !user.is_email_verified {
            return Err(AuthError::unauthorized("email must be verified"));
        }

        let issued = self
            .store_breaker
            .call(
                self.one_time
                    .issue(OneTimeTokenKind::PasswordReset, user.id, &user.email),
            )
            .await
            .map_err(AuthError::internal)?;

        self.publish_best_effort(
            ctx,
            AuthEvent::PasswordReset {
                email: user.email.clone(),
                reset_url: self.absolute_url(&issued.url_suffix),
            },
        )
        .await;

        Ok(())
    }

    /// Unauthenticated variant. Never fails and never reveals whether the
    /// email exists: unknown and unverified addresses are silently ignored,
    /// and every internal error is swallowed.
    pub async fn forgot_password(&self, ctx: &RequestContext, email: &str) {
        match self.users.get_by_email(email).await {
            Ok(user) if user.is_email_verified => {
                match self
                    .store_breaker
                    .call(
                        self.one_time
                            .issue(OneTimeTokenKind::PasswordReset, user.id, &user.email),
                    )
                    .await
                {
                    Ok(issued) => {
                        self.publish_best_effort(
                            ctx,
                            AuthEvent::PasswordReset {
                                email: user.email.clone(),
                                reset_url: self.absolute_url(&issued.url_suffix),
                            },
                        )
                        .await;
                    }
                    Err(e) => warn!("reset token issue failed during forgot-password: {}", e),
                }
                return;
            }
            Ok(_) => debug!("password reset requested for unverified email"),
            Err(UserStoreError::NotFound) => debug!("password reset requested for unknown email"),
            Err(e) => warn!("user lookup failed during forgot-password: {}", e),
        }

        // keep the silent paths on the same clock as the issuing path
        if self.config.enumeration_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.enumeration_delay_ms)).await;
        }
    }

    /// Consume the reset token and replace the password hash. The token is
    /// gone after the first call regardless of what follows.
    pub async fn reset_password(
        &self,
        _ctx: &RequestContext,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let record = match self
            .store_breaker
            .call(self.one_time.consume(OneTimeTokenKind::PasswordReset, token))
            .await
        {
            Ok(record) => record,
            Err(CircuitError::Inner(OneTimeTokenError::NotFound)) => {
                return Err(AuthError::unauthorized("invalid or expired reset token"))
            }
            Err(e) => return Err(AuthError::internal(e)),
        };

        let mut user = self
            .users
            .get_by_id(record.user_id)
            .await
            .map_err(|e| match e {
                UserStoreError::NotFound => {
                    AuthError::unauthorized("invalid or expired reset token")
                }
                e => AuthError::internal(e),
            })?;

        user.password_hash =
            hash_password(new_password, self.config.bcrypt_cost).map_err(AuthError::internal)?;
        self.users.update(&user).await.map_err(AuthError::internal)?;

        info!(user_id = user.id, "password reset completed");
        Ok(())
    }
}
