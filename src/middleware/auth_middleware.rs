// Authentication middleware for protected routes: validates the bearer
// token (signature, expiry, revocation set) and injects AuthenticatedUser
// into request extensions.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    app::AppState,
    services::{CircuitError, TokenError},
    utils::auth_errors::AuthError,
};

/// The authenticated principal, available to handlers behind the auth
/// middleware. Carries the raw bearer token so logout can revoke it.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role_id: i32,
    pub token_id: String,
    pub exp: i64,
    pub bearer: String,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => header[7..].to_string(),
        _ => {
            return AuthError::unauthorized("missing or invalid authorization header")
                .into_response();
        }
    };

    // revocation probe traverses the store, so the call runs through the
    // store breaker; a degraded store must never admit a token
    match state
        .store_breaker
        .call(state.token_engine.validate_access(&token))
        .await
    {
        Ok(claims) => {
            let auth_user = AuthenticatedUser {
                user_id: claims.sub,
                role_id: claims.role_id,
                token_id: claims.jti,
                exp: claims.exp,
                bearer: token,
            };
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(CircuitError::Open) => {
            AuthError::internal("token store unavailable").into_response()
        }
        Err(CircuitError::Inner(TokenError::Store(e))) => AuthError::internal(e).into_response(),
        Err(CircuitError::Inner(e)) => {
            tracing::warn!("access token validation failed: {}", e);
            AuthError::unauthorized("invalid or expired token").into_response()
        }
    }
}

/// Extractor for AuthenticatedUser from request extensions, so handlers can
/// take it as a parameter directly.
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AuthError::unauthorized("authentication required").into_response())
    }
}
