// Business logic layer: token lifecycle, credential workflows, request
// gating and event emission.

pub mod auth;
pub mod circuit_breaker;
pub mod events;
pub mod one_time;
pub mod rate_limit;
pub mod token;

pub use auth::{AuthService, AuthServiceConfig, RegisterInput, SessionTokens};
pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState,
};
pub use events::{AmqpEventPublisher, AuthEvent, EventPublisher, PublishError, EVENTS_EXCHANGE};
pub use one_time::{
    IssuedToken, OneTimeTokenConfig, OneTimeTokenError, OneTimeTokenKind, OneTimeTokenStore,
};
pub use rate_limit::{RateLimitDecision, RateLimitSettings, RateLimiter, RoutePolicy};
pub use token::{TokenEngine, TokenEngineConfig, TokenError};
