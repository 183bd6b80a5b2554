// Authentication handlers: request parsing, sanitization, validation, rate
// gating, and mapping workflow results to responses and cookies.

use axum::{
    extract::{ConnectInfo, Extension, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

use crate::{
    app::AppState,
    app_config::AppConfig,
    context::RequestContext,
    middleware::auth_middleware::AuthenticatedUser,
    models::user::User,
    services::{rate_limit::routes, RegisterInput, SessionTokens},
    utils::{
        auth_errors::AuthError,
        validation::{
            flatten_validation_errors, sanitize_email, sanitize_password, sanitize_username,
            validate_password, validate_username_charset,
        },
    },
};

pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
/// Scope the refresh cookie to this service's prefix only.
pub const AUTH_COOKIE_PATH: &str = "/auth/v1";

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 255, message = "Email must be less than 255 characters"))]
    pub email: String,

    #[validate(custom(function = "validate_password"))]
    pub password: String,

    #[validate(length(
        min = 3,
        max = 50,
        message = "Username must be between 3 and 50 characters"
    ))]
    #[validate(custom(function = "validate_username_charset"))]
    pub username: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ResetPasswordRequest {
    pub token: String,

    #[validate(custom(function = "validate_password"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: User,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Rate-limit principal: the authenticated user when available, otherwise
/// the client ip (X-Forwarded-For first hop over the socket address).
fn client_principal(headers: &HeaderMap, addr: &SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => format!("ip:{}", ip),
        None => format!("ip:{}", addr.ip()),
    }
}

fn user_principal(user_id: i64) -> String {
    format!("user:{}", user_id)
}

/// Evaluate the route's bucket. Returns the remaining tokens for the
/// response header, or a ready 429 response on denial.
async fn gate(state: &AppState, route: &'static str, principal: String) -> Result<u32, Response> {
    let decision = state.rate_limiter.take(route, &principal).await;
    if decision.allowed {
        Ok(decision.tokens_remaining)
    } else {
        Err(AuthError::too_many_requests(decision.retry_after_secs()).into_response())
    }
}

fn with_rate_limit_remaining(mut response: Response, remaining: u32) -> Response {
    response.headers_mut().insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(remaining),
    );
    response
}

fn build_refresh_cookie(token: String, config: &AppConfig) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE_NAME, token))
        .path(AUTH_COOKIE_PATH)
        .http_only(true)
        .secure(config.is_production() || config.secure_cookies)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(config.refresh_token_ttl_secs as i64))
        .build()
}

/// Negative max-age deletes the cookie.
fn build_delete_refresh_cookie(config: &AppConfig) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE_NAME, ""))
        .path(AUTH_COOKIE_PATH)
        .http_only(true)
        .secure(config.is_production() || config.secure_cookies)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(-1))
        .build()
}

/// Shared shape of login and refresh responses: access token in the body
/// and the Authorization header, refresh secret only in the HttpOnly cookie.
fn session_response(
    session: SessionTokens,
    jar: CookieJar,
    config: &AppConfig,
    remaining: u32,
) -> Response {
    let refresh_cookie = build_refresh_cookie(session.refresh_secret, config);
    let body = SessionResponse {
        access_token: session.access_token.clone(),
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_ttl_secs,
        user: session.user,
    };

    let mut response = (StatusCode::OK, jar.add(refresh_cookie), Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", session.access_token)) {
        response.headers_mut().insert(header::AUTHORIZATION, value);
    }
    with_rate_limit_remaining(response, remaining)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /auth/v1/register
pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut payload): Json<RegisterRequest>,
) -> Response {
    payload.email = sanitize_email(&payload.email);
    payload.username = sanitize_username(&payload.username);
    payload.password = sanitize_password(&payload.password);

    if let Err(errors) = payload.validate() {
        return AuthError::invalid_input(flatten_validation_errors(errors)).into_response();
    }

    let remaining = match gate(&state, routes::REGISTER, client_principal(&headers, &addr)).await {
        Ok(remaining) => remaining,
        Err(denied) => return denied,
    };

    let input = RegisterInput {
        email: payload.email,
        username: payload.username,
        password: payload.password,
    };

    match state.auth_service.register(&ctx, input).await {
        Ok(()) => with_rate_limit_remaining(
            (
                StatusCode::CREATED,
                Json(MessageResponse::new("User registered successfully")),
            )
                .into_response(),
            remaining,
        ),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/v1/login
pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let email = sanitize_email(&payload.email);
    let password = sanitize_password(&payload.password);

    if email.is_empty() || !email.contains('@') {
        return AuthError::invalid_input("invalid email format").into_response();
    }
    if password.is_empty() {
        return AuthError::invalid_input("password is required").into_response();
    }

    let remaining = match gate(&state, routes::LOGIN, client_principal(&headers, &addr)).await {
        Ok(remaining) => remaining,
        Err(denied) => return denied,
    };

    match state.auth_service.login(&ctx, &email, &password).await {
        Ok(session) => session_response(session, jar, &state.config, remaining),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/v1/refresh
pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let refresh_secret = jar
        .get(REFRESH_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());

    let refresh_secret = match refresh_secret {
        Some(secret) => secret,
        None => return AuthError::unauthorized("refresh token not provided").into_response(),
    };

    let remaining = match gate(&state, routes::REFRESH, client_principal(&headers, &addr)).await {
        Ok(remaining) => remaining,
        Err(denied) => return denied,
    };

    match state.auth_service.refresh(&ctx, &refresh_secret).await {
        Ok(session) => session_response(session, jar, &state.config, remaining),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/v1/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    user: AuthenticatedUser,
    jar: CookieJar,
) -> Response {
    let refresh_secret = jar
        .get(REFRESH_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());

    match state
        .auth_service
        .logout(&ctx, &user.bearer, refresh_secret.as_deref())
        .await
    {
        Ok(()) => {
            let jar = jar.add(build_delete_refresh_cookie(&state.config));
            (StatusCode::NO_CONTENT, jar).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /auth/v1/verify-email
pub async fn verify_email(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Response {
    let token = payload.token.trim();
    if token.is_empty() {
        return AuthError::invalid_input("token is required").into_response();
    }

    match state.auth_service.verify_email(&ctx, token).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Email verified successfully")),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/v1/forgot-password
///
/// Always answers 202 with the same body; existence of the account is never
/// revealed through status, body, or (within a generous bound) timing.
pub async fn forgot_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Response {
    let principal = client_principal(&headers, &addr);
    let remaining = match gate(&state, routes::FORGOT_PASSWORD, principal).await {
        Ok(remaining) => remaining,
        Err(denied) => return denied,
    };

    let email = sanitize_email(&payload.email);
    if validator::validate_email(email.as_str()) {
        state.auth_service.forgot_password(&ctx, &email).await;
    }

    with_rate_limit_remaining(
        (
            StatusCode::ACCEPTED,
            Json(MessageResponse::new(
                "If an account with that email exists, a password reset link has been sent",
            )),
        )
            .into_response(),
        remaining,
    )
}

/// POST /auth/v1/request-password-reset (authenticated)
pub async fn request_password_reset(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    user: AuthenticatedUser,
) -> Response {
    let remaining = match gate(
        &state,
        routes::REQUEST_PASSWORD_RESET,
        user_principal(user.user_id),
    )
    .await
    {
        Ok(remaining) => remaining,
        Err(denied) => return denied,
    };

    match state
        .auth_service
        .request_password_reset(&ctx, user.user_id)
        .await
    {
        Ok(()) => with_rate_limit_remaining(
            (
                StatusCode::ACCEPTED,
                Json(MessageResponse::new("Password reset link has been sent")),
            )
                .into_response(),
            remaining,
        ),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/v1/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut payload): Json<ResetPasswordRequest>,
) -> Response {
    payload.new_password = sanitize_password(&payload.new_password);
    if let Err(errors) = payload.validate() {
        return AuthError::invalid_input(flatten_validation_errors(errors)).into_response();
    }

    let token = payload.token.trim();
    if token.is_empty() {
        return AuthError::invalid_input("token is required").into_response();
    }

    let remaining = match gate(
        &state,
        routes::RESET_PASSWORD,
        client_principal(&headers, &addr),
    )
    .await
    {
        Ok(remaining) => remaining,
        Err(denied) => return denied,
    };

    match state
        .auth_service
        .reset_password(&ctx, token, &payload.new_password)
        .await
    {
        Ok(()) => with_rate_limit_remaining(
            (
                StatusCode::OK,
                Json(MessageResponse::new("Password has been successfully reset")),
            )
                .into_response(),
            remaining,
        ),
        Err(e) => e.into_response(),
    }
}
