// Library exports for the authentication core.
// Embedders supply their own UserStore implementation and call
// initialize_app_state; the bundled binary runs standalone.

pub mod app;
pub mod app_config;
pub mod context;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use context::RequestContext;
pub use middleware::{auth_middleware, AuthenticatedUser};
pub use models::{
    AccessTokenClaims, MemoryUserStore, NewUser, OneTimeTokenRecord, RefreshTokenRecord, User,
    UserStore, UserStoreError,
};
pub use services::{
    AmqpEventPublisher, AuthEvent, AuthService, AuthServiceConfig, BreakerError, CircuitBreaker,
    CircuitBreakerConfig, CircuitError, CircuitState, EventPublisher, OneTimeTokenConfig,
    OneTimeTokenKind, OneTimeTokenStore, PublishError, RateLimitSettings, RateLimiter,
    RegisterInput, SessionTokens, TokenEngine, TokenEngineConfig, TokenError,
};
pub use store::{
    Clock, KeyValueStore, ManualClock, MemoryStore, RedisStore, StoreError, SystemClock,
};
pub use utils::{AuthError, ErrorCode};

// Re-export the route builder
pub use handlers::auth_routes;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Wire the application state from the global configuration: store,
/// publisher, breakers, token engine, one-time tokens, rate limiter and the
/// workflow orchestrator. The user store is supplied by the caller.
pub async fn initialize_app_state(users: Arc<dyn UserStore>) -> Result<AppState> {
    let config = app_config::config();

    info!("Initializing key-value store...");
    let store: Arc<dyn KeyValueStore> = Arc::new(RedisStore::connect(&config.store_config()).await?);

    info!("Connecting to event broker...");
    let publisher: Arc<dyn EventPublisher> =
        Arc::new(AmqpEventPublisher::connect(&config.amqp_url).await?);

    build_app_state(users, store, publisher, Arc::new(config.clone()))
}

/// Assemble state from already-constructed collaborators. Tests use this
/// with in-memory substitutes.
pub fn build_app_state(
    users: Arc<dyn UserStore>,
    store: Arc<dyn KeyValueStore>,
    publisher: Arc<dyn EventPublisher>,
    config: Arc<AppConfig>,
) -> Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let token_engine = Arc::new(TokenEngine::new(
        config.token_engine_config(),
        store.clone(),
        clock.clone(),
    )?);

    let one_time = Arc::new(OneTimeTokenStore::new(
        store.clone(),
        clock,
        config.one_time_config(),
    ));

    let rate_limiter = Arc::new(RateLimiter::new(store, config.rate_limit_settings()));

    let store_breaker = Arc::new(CircuitBreaker::new("kv-store", config.breaker_config()));
    let broker_breaker = Arc::new(CircuitBreaker::new("broker", config.breaker_config()));

    let auth_service = Arc::new(AuthService::new(
        users,
        token_engine.clone(),
        one_time,
        publisher,
        store_breaker.clone(),
        broker_breaker,
        AuthServiceConfig {
            frontend_base_url: config.frontend_base_url.clone(),
            bcrypt_cost: config.bcrypt_cost,
            enumeration_delay_ms: config.enumeration_delay_ms,
        },
    ));

    Ok(AppState {
        config,
        auth_service,
        token_engine,
        rate_limiter,
        store_breaker,
    })
}
