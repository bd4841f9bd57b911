use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

mod cache;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod services;

use cache::Cache;
use config::Config;
use middleware::rate_limit::RateLimiter;
use services::stripe::StripeClient;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub cache: Cache,
    pub config: Arc<Config>,
    pub stripe: Option<StripeClient>,
    pub rate_limiter: RateLimiter,
    pub checkout_rate_limiter: RateLimiter,
}

fn build_router(state: AppState) -> Router {
    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // --- Public read routes ---
    let org_routes = Router::new()
        .route("/", get(routes::organizations::list_organizations))
        .route("/:id", get(routes::organizations::get_organization));

    let campaign_routes = Router::new()
        .route("/", get(routes::campaigns::list_campaigns))
        .route("/:id", get(routes::campaigns::get_campaign));

    // --- Donation routes ---
    // optional_auth is layered after the limiter so it runs first and the
    // limiter can key on the authenticated user
    let donation_routes = Router::new()
        .route("/config", get(routes::donations::stripe_config))
        .route(
            "/checkout",
            post(routes::donations::create_checkout)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit::checkout_rate_limit,
                ))
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::auth::optional_auth,
                )),
        )
        .route("/checkout/success", get(routes::donations::checkout_success))
        .route(
            "/:id/receipt",
            post(routes::donations::issue_receipt)
                .get(routes::donations::get_receipt)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::auth::authenticate,
                )),
        );

    let me_routes = Router::new()
        .route("/donations", get(routes::me::my_donations))
        .route(
            "/recurring-donations",
            get(routes::me::my_recurring_donations),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Webhook routes (raw body, no auth, no rate limit) ---
    let webhook_routes = Router::new().route("/stripe", post(routes::webhooks::stripe_webhook));

    // --- Compose full API ---
    let api = Router::new()
        .nest("/organizations", org_routes)
        .nest("/campaigns", campaign_routes)
        .nest("/donations", donation_routes)
        .nest("/me", me_routes)
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ));

    Router::new()
        .nest("/api/v1", api)
        .nest("/api/v1/webhooks", webhook_routes)
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::health::metrics))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let pool = db::create_pool(&config).await;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let cache = Cache::new(&config).await;
    let stripe = StripeClient::new(&config.stripe);
    let rate_limiter =
        RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);
    let checkout_rate_limiter =
        RateLimiter::new(config.rate_limit.checkout_max, config.rate_limit.window_secs);

    let port = config.port;
    let state = AppState {
        db: pool,
        cache,
        config: Arc::new(config),
        stripe,
        rate_limiter,
        checkout_rate_limiter,
    };

    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Seed & Spoon donations API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind port");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
