use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};

use http::{header, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod notify;
mod state;

mod crypto {
    pub mod password;
    pub mod token;
}

mod models {
    pub mod audit;
    pub mod session;
    pub mod user;
}

mod repositories {
    pub mod audit;
    pub mod session;
    pub mod user;
}

mod services {
    pub mod audit;
    pub mod auth;
    pub mod security;
    pub mod session;
}

mod handlers {
    pub mod audit;
    pub mod auth;
    pub mod health;
    pub mod sessions;
}

mod middleware_layer {
    pub mod auth;
}

mod validation {
    pub mod auth;
}

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(config)?;
    tracing::info!("✅ AppState initialized");

    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:3000".parse().unwrap(),
            "http://127.0.0.1:3000".parse().unwrap(),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            "x-session-token".parse().unwrap(),
        ])
        .allow_credentials(true)
        .expose_headers(["x-session-token".parse().unwrap()])
        .max_age(Duration::from_secs(86400));

    // Transport-level throttle on the unauthenticated auth routes; the
    // per-identity rate limiting lives in the security gate.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .use_headers()
            .finish()
            .unwrap(),
    );

    let public_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/verify-2fa", post(handlers::auth::verify_two_factor))
        .route("/api/auth/resend-2fa", post(handlers::auth::resend_two_factor))
        .layer(tower_governor::GovernorLayer::new(auth_governor_conf))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/session-info", get(handlers::sessions::session_info))
        .route("/api/auth/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/api/auth/extend-session",
            post(handlers::sessions::extend_session),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_session,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route(
            "/api/auth/revoke-session/{session_id}",
            post(handlers::sessions::revoke_session),
        )
        .route(
            "/api/auth/revoke-user-sessions/{user_id}",
            post(handlers::sessions::revoke_user_sessions),
        )
        .route("/api/audit/logs", get(handlers::audit::logs))
        .route("/api/audit/security", get(handlers::audit::security_events))
        .route("/api/audit/statistics", get(handlers::audit::statistics))
        .route_layer(from_fn(middleware_layer::auth::require_admin))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_session,
        ))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .merge(health_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(cors);

    let sweep_state = state.clone();
    let sweep_interval = state.config.session_cleanup_interval_minutes.max(1);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(sweep_interval * 60)).await;
            tracing::info!("🧹 Running expired-session sweep...");
            match services::session::cleanup_expired(&sweep_state).await {
                Ok(swept) => {
                    tracing::info!(swept, "✅ Session sweep completed");
                }
                Err(e) => {
                    tracing::error!("❌ Session sweep failed: {}", e);
                }
            }
        }
    });

    let retention_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            tracing::info!("🧹 Running audit retention sweep...");
            match retention_state.audit.sweep_retention(chrono::Utc::now()).await {
                Ok(removed) => {
                    tracing::info!(removed, "✅ Audit retention sweep completed");
                }
                Err(e) => {
                    tracing::error!("❌ Audit retention sweep failed: {}", e);
                }
            }
        }
    });

    let addr: SocketAddr = state.config.bind_addr.parse()?;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Background sweeps started");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
