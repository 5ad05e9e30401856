use anyhow::anyhow;
use tracing::{info, warn};

use crate::ServerError;

/// Runtime configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Secret key for the payment gateway. Payments are unavailable without it.
    pub stripe_secret_key: Option<String>,
    /// Signing secret for gateway webhooks. The webhook endpoint refuses events without it.
    pub stripe_webhook_secret: Option<String>,
    pub payment_currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ServerError> {
        // Load the .env file only in the development environment (bypassed with the --release flag)
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow!("DATABASE_URL environment variable not found"))?;

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());

        let stripe_secret_key = optional_var("STRIPE_SECRET_KEY");
        match stripe_secret_key {
            Some(_) => info!("Successfully loaded Stripe secret key"),
            None => warn!("STRIPE_SECRET_KEY is not set. Paid entries and deposits are disabled"),
        }

        let stripe_webhook_secret = optional_var("STRIPE_WEBHOOK_SECRET");
        if stripe_webhook_secret.is_none() {
            warn!("STRIPE_WEBHOOK_SECRET is not set. Gateway webhooks will be refused");
        }

        let payment_currency = optional_var("PAYMENT_CURRENCY").unwrap_or_else(|| "usd".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            stripe_secret_key,
            stripe_webhook_secret,
            payment_currency,
        })
    }
}

/// Treats an empty variable the same as a missing one.
fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
