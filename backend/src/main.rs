//! Stock Valuation Engine - Backend Server

use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stock_valuation_backend::authz::RoleAuthorizer;
use stock_valuation_backend::services::notification::run_notifier;
use stock_valuation_backend::services::{EventPublisher, LogSink};
use stock_valuation_backend::{create_app, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "sve_server=debug,stock_valuation_backend=debug,tower_http=debug,sqlx=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Stock Valuation Engine");
    tracing::info!("Environment: {}", config.environment);

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let (events, receiver) = EventPublisher::channel(config.engine.event_buffer);
    tokio::spawn(run_notifier(receiver, LogSink));

    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        authorizer: Arc::new(RoleAuthorizer),
        events,
    };

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
