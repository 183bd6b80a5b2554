pub mod auth;

use axum::{middleware as axum_middleware, routing::post, Router};

use crate::{app::AppState, middleware::auth_middleware};

/// Authentication routes, mounted under `/auth/v1`.
pub fn auth_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/logout", post(auth::logout))
        .route("/request-password-reset", post(auth::request_password_reset))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            auth_middleware::auth_middleware,
        ));

    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh_token))
        .route("/verify-email", post(auth::verify_email))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .merge(protected)
}
