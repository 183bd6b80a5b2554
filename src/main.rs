use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware as axum_middleware, Router};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse_auth::{
    app_config, auth_routes, initialize_app_state,
    middleware::request_context::request_context_middleware, MemoryUserStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("gatehouse-auth v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse_auth=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    let config = app_config::config();
    info!("Starting gatehouse-auth on {}", config.bind_address);
    info!("Environment: {}", config.environment);

    // The relational user store is an external collaborator. The standalone
    // binary runs on the in-memory reference implementation; embedders pass
    // their own UserStore into initialize_app_state.
    let users = Arc::new(MemoryUserStore::new());
    info!("Using in-memory user store (standalone mode)");

    let state = initialize_app_state(users).await?;

    let app = Router::new()
        .nest("/auth/v1", auth_routes(state.clone()))
        .layer(axum_middleware::from_fn(request_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on {}", config.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
