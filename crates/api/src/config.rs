//! API server configuration

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Direct (non-pooler) URL used for migrations when set.
    pub database_direct_url: Option<String>,
    pub port: u16,
    /// Shared secret gating the /admin routes.
    pub admin_token: String,
    /// Runtime environment name ("production", "staging", ...).
    pub environment: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_direct_url: std::env::var("DATABASE_DIRECT_URL").ok(),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            admin_token: std::env::var("ADMIN_TOKEN").context("ADMIN_TOKEN must be set")?,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }
}
