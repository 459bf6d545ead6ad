use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod anchor;
mod clock;
mod config;
mod database;
mod error;
mod hashing;
mod notify;
mod validation;

use anchor::CalendarClient;
use clock::SystemClock;
use config::AppConfig;
use database::Database;
use hashing::{AnchorScheduler, BallotHasher, HashingScheduler};
use notify::{retry_queue, ResilientNotifier, RetryWorker, WebhookSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ballot_anchor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ballot anchor service");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded");

    // Initialize database
    let database = Database::new(&config.database_url).await?;
    info!("Database connected");

    // Run migrations
    database.run_migrations().await?;
    info!("Database migrations completed");

    // Shutdown channel observed by every background loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Resilient notifier and its retry worker
    let (queue, queue_rx) = retry_queue();
    let sink = Arc::new(WebhookSink::new(config.notify_webhook_url.clone()));
    let notifier = Arc::new(ResilientNotifier::new(
        sink,
        config.notifier.clone(),
        queue.clone(),
    ));
    let worker = RetryWorker::new(
        notifier.clone(),
        queue_rx,
        queue,
        config.notifier.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(worker.run());
    info!("Notification retry worker started");

    // Ballot hasher with the calendar-backed timestamp authority
    let authority = Arc::new(CalendarClient::new(config.calendar_url.clone()));
    let hasher = Arc::new(BallotHasher::new(
        database.clone(),
        authority,
        notifier,
        Arc::new(SystemClock),
    ));

    // Hashing scheduler: finds un-hashed ballots and hashes them
    let hash_scheduler = HashingScheduler::new(
        database.clone(),
        hasher.clone(),
        Duration::from_secs(config.hash_interval_secs),
        shutdown_rx.clone(),
    );
    tokio::spawn(hash_scheduler.run());
    info!("Hashing scheduler started");

    // Anchor scheduler: the single serialized trigger for batch anchoring
    let anchor_scheduler = AnchorScheduler::new(
        hasher,
        Duration::from_secs(config.anchor_interval_secs),
        shutdown_rx,
    );
    tokio::spawn(anchor_scheduler.run());
    info!("Anchor scheduler started");

    // Build application
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state((config.clone(), database));

    // Start server
    let addr = SocketAddr::new(config.server_host.parse()?, config.server_port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ballot-anchor",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(
    State((config, database)): State<(AppConfig, Database)>,
) -> Json<serde_json::Value> {
    let mut status = serde_json::json!({
        "status": "healthy",
        "service": "ballot-anchor",
        "timestamp": chrono::Utc::now(),
        "intervals": {
            "hash_secs": config.hash_interval_secs,
            "anchor_secs": config.anchor_interval_secs
        }
    });

    match database.pipeline_counts().await {
        Ok(counts) => {
            status["pipeline"] = serde_json::json!(counts);
        }
        Err(e) => {
            error!("Failed to read pipeline counts: {}", e);
            status["pipeline"] = serde_json::json!({ "status": "error" });
        }
    }

    Json(status)
}
