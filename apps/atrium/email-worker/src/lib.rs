//! Email Worker Service
//!
//! A background worker that owns the lifecycle of the email notification
//! queue: it connects to PostgreSQL, selects a delivery provider, starts
//! the periodic drain loop, and shuts it down cleanly on SIGINT/SIGTERM.
//!
//! ## Architecture
//!
//! ```text
//! PostgreSQL (email_notifications)
//!   ↓ (claim due records, FIFO by scheduled_at)
//! EmailQueue<PgNotificationRepository, Provider, PgUserDirectory>
//!   ↓ (one awaited send at a time)
//! SMTP relay or SendGrid
//! ```
//!
//! ## Configuration
//!
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `EMAIL_PROVIDER`: `smtp` (default) or `sendgrid`
//! - `APP_ENV`: `production` switches logs to JSON
//! - `EMAIL_BATCH_SIZE`, `EMAIL_PROCESSING_INTERVAL_SECS`, and the other
//!   `EMAIL_*` variables override `QueueConfig` defaults

use domain_notifications::providers::{SendGridProvider, SmtpProvider};
use domain_notifications::{
    EmailProvider, EmailQueue, PgNotificationRepository, PgUserDirectory, QueueConfig,
};
use eyre::{Result, WrapErr, eyre};
use sea_orm::{Database, DatabaseConnection};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing (env-aware: JSON for prod, pretty for dev).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let is_production = std::env::var("APP_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    if is_production {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init();
    }
}

/// Connect to PostgreSQL with retry.
async fn connect_with_retry(url: &str) -> Result<DatabaseConnection> {
    const MAX_ATTEMPTS: u32 = 5;

    let mut attempt = 1;
    loop {
        match Database::connect(url).await {
            Ok(db) => return Ok(db),
            Err(e) if attempt < MAX_ATTEMPTS => {
                let backoff = Duration::from_secs(2u64.pow(attempt.min(4)));
                warn!(
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "PostgreSQL connection failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e).wrap_err("Failed to connect to PostgreSQL"),
        }
    }
}

/// Run the email worker.
///
/// # Errors
///
/// Returns an error if:
/// - `DATABASE_URL` is missing or the connection fails after retries
/// - The selected provider is misconfigured
pub async fn run() -> Result<()> {
    init_tracing();

    info!("Starting email worker service");

    let database_url =
        std::env::var("DATABASE_URL").wrap_err("DATABASE_URL must be set")?;

    info!("Connecting to PostgreSQL...");
    let db = connect_with_retry(&database_url).await?;
    info!("Connected to PostgreSQL successfully");

    let provider_kind =
        std::env::var("EMAIL_PROVIDER").unwrap_or_else(|_| "smtp".to_string());

    match provider_kind.as_str() {
        "sendgrid" => {
            let provider = SendGridProvider::from_env()
                .map_err(|e| eyre!("SendGrid configuration error: {}", e))?;
            serve(db, provider).await
        }
        "smtp" => {
            let provider = SmtpProvider::from_env()
                .map_err(|e| eyre!("SMTP configuration error: {}", e))?;
            serve(db, provider).await
        }
        other => Err(eyre!("Unknown EMAIL_PROVIDER '{}'", other)),
    }
}

/// Wire up the queue around the chosen provider and run until shutdown.
async fn serve<P: EmailProvider + 'static>(db: DatabaseConnection, provider: P) -> Result<()> {
    if let Err(e) = provider.health_check().await {
        warn!(provider = provider.name(), error = %e, "Provider health check failed");
    }

    let repository = PgNotificationRepository::new(db.clone());
    let directory = PgUserDirectory::new(db);
    let queue = EmailQueue::new(repository, provider, directory, QueueConfig::default());

    queue.start_processing().await;

    if let Err(e) = shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }

    info!("Shutting down email worker...");
    queue.stop_processing().await;

    info!("Email worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
