//! Biblis Server - Library Circulation
//!
//! Host process for the circulation core: connects the database, applies
//! migrations and runs the daily due-notice scheduler.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biblis_server::{
    clock::SystemClock,
    config::{AppConfig, NoticeTransport},
    repository::postgres::PostgresCirculationRepository,
    scheduler::DueNoticeScheduler,
    services::{
        notifier::{DueNotifier, EmailNotifier, LogNotifier},
        Services,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("biblis_server={}", config.logging.level).into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Biblis Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Create repository and services
    let repository = Arc::new(PostgresCirculationRepository::new(pool));
    let notifier: Arc<dyn DueNotifier> = match config.notices.transport {
        NoticeTransport::Log => Arc::new(LogNotifier),
        NoticeTransport::Email => Arc::new(EmailNotifier::new(config.email.clone())),
    };
    let services = Services::new(
        repository,
        notifier,
        config.limits,
        Arc::new(SystemClock),
    );

    tracing::info!(
        run_at = %config.notices.run_at,
        days_ahead = config.notices.days_ahead,
        page_size = config.notices.page_size,
        "Due-notice scheduler starting"
    );

    let scheduler = DueNoticeScheduler::new(services.notifications.clone(), config.notices.clone());
    scheduler.run().await;

    Ok(())
}
