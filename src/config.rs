//! Environment-driven configuration

use anyhow::{Context, Result};
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Without a database the engine runs on the in-memory store.
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    /// Shared secret for verifying processor-signed payment confirmations.
    pub payment_signing_secret: String,
    pub currency: String,
    pub quote_ttl_secs: i64,
    pub commit_max_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            port: env::var("PORT").unwrap_or_else(|_| "8084".to_string()).parse().context("PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").ok(),
            nats_url: env::var("NATS_URL").ok(),
            payment_signing_secret: env::var("PAYMENT_SIGNING_SECRET")
                .context("PAYMENT_SIGNING_SECRET must be set")?,
            currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            quote_ttl_secs: env::var("QUOTE_TTL_SECS").unwrap_or_else(|_| "1800".to_string()).parse().context("QUOTE_TTL_SECS must be an integer")?,
            commit_max_retries: env::var("COMMIT_MAX_RETRIES").unwrap_or_else(|_| "3".to_string()).parse().context("COMMIT_MAX_RETRIES must be an integer")?,
        })
    }
}
