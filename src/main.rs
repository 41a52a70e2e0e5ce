use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use axum::{routing::get, Router};
use credit_report_engine::config::Config;
use credit_report_engine::db::Database;
use credit_report_engine::db_storage::PgStore;
use credit_report_engine::handlers::{self, AppState};
use credit_report_engine::obs;
use credit_report_engine::store::ReportStore;

/// Main entry point for the application.
///
/// Loads configuration, connects to Postgres (running migrations when
/// enabled), wires the services onto a shared store and serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    obs::init_tracing("credit_report_engine=debug,tower_http=debug");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::from_config(&config).await?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn ReportStore> = Arc::new(PgStore::new(db.pool.clone()));
    let app_state = Arc::new(AppState::new(config.clone(), store));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Request size limit: 5MB max payload
            .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
            // Rate limiting: 10 req/sec per IP, burst of 20
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
