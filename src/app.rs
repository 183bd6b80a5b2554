// Application state shared across handlers.
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    services::{AuthService, CircuitBreaker, RateLimiter, TokenEngine},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth_service: Arc<AuthService>,
    pub token_engine: Arc<TokenEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub store_breaker: Arc<CircuitBreaker>,
}
