//! API server configuration.

use sso_core::config::{AuthConfig, resolve_secret};

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis URL for the shared cache; the in-process cache is used when unset.
    pub redis_url: Option<String>,
    /// Passphrase for encrypting federated provider tokens at rest.
    pub token_encryption_key: String,
    pub auth: AuthConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable               | Default                          |
    /// |------------------------|----------------------------------|
    /// | `BIND_ADDR`            | `127.0.0.1:3100`                 |
    /// | `DATABASE_URL`         | `postgres://localhost:5432/sso`  |
    /// | `REDIS_URL`            | unset (in-process cache)         |
    /// | `TOKEN_ENCRYPTION_KEY` | generated & persisted to file    |
    ///
    /// Authentication settings come from [`AuthConfig::from_env`].
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/sso".into()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            token_encryption_key: resolve_secret("TOKEN_ENCRYPTION_KEY", "token-key"),
            auth: AuthConfig::from_env(),
        }
    }
}
