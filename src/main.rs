use std::{fs::File, sync::Arc};
use tracing::{info, info_span, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use config::Config;
use database::{Database, PgDatabase};
use payments::{PaymentGateway, StripeApi};
use realtime::Hub;

/// Runtime configuration read from the environment.
mod config;
/// Traits and types used for interacting with the database.
mod database;
/// Contains functions for the admin audit trail.
mod log;
/// Payment gateway client and webhook settlement.
mod payments;
/// WebSocket connection registry and event fan-out.
mod realtime;
/// The tournament registration flow.
mod registration;
/// All the HTTP routes the server exposes.
///
/// Additionally, it contains the `RoutesContainer` trait that groups routes by who may call them,
/// as well as the extractors used to authenticate callers.
mod routes;
mod utils;

#[cfg(test)]
mod test_utils;

/// Stores data used by the server.
///
/// Accessible by all route handlers through the `State` extractor.
#[derive(Clone)]
pub struct AppState {
    database: Arc<dyn Database>,
    /// `None` when no gateway key is configured. Paid operations then report the gateway as
    /// unavailable.
    payments: Option<Arc<dyn PaymentGateway>>,
    hub: Arc<Hub>,
    webhook_secret: Option<String>,
    currency: String,
}

impl AppState {
    /// Create a new state with a given database and optional payment gateway.
    fn new(
        database: Arc<dyn Database>,
        payments: Option<Arc<dyn PaymentGateway>>,
        webhook_secret: Option<String>,
        currency: String,
    ) -> Self {
        Self {
            database,
            payments,
            hub: Arc::new(Hub::new()),
            webhook_secret,
            currency,
        }
    }
}

/// A thread-safe Error type used by the server.
pub type ServerError = anyhow::Error;

#[tokio::main]
async fn main() {
    if let Err(e) = setup_tracing() {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run().await {
        panic!("Error trying to run the server: {}", e);
    }
}

/// The main function that runs the server.
async fn run() -> Result<(), ServerError> {
    let setup_span = info_span!("server_setup");
    let guard = setup_span.enter();

    let config = Config::from_env()?;

    let pg_database = PgDatabase::connect(&config.database_url).await?;
    pg_database.migrate().await?;
    info!("Database migrations are up to date");

    let payments: Option<Arc<dyn PaymentGateway>> = match config.stripe_secret_key.as_deref() {
        Some(key) => Some(Arc::new(StripeApi::new(key))),
        None => None,
    };
    if payments.is_none() {
        warn!("Starting without a payment gateway");
    }

    let state = AppState::new(
        Arc::new(pg_database),
        payments,
        config.stripe_webhook_secret.clone(),
        config.payment_currency.clone(),
    );

    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);
    drop(guard);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Sets up the tracing subscriber for the server.
fn setup_tracing() -> Result<(), ServerError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("arena_server=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("debug.log")?;

    // Set up tracing with a filter that only logs errors in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}
