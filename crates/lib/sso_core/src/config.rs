//! Configuration for the identity core.
//!
//! Every input is read from the environment by [`AuthConfig::from_env`].
//! Signing secrets that are not supplied are generated once and persisted
//! under the platform data directory.

use std::path::PathBuf;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::info;

/// Access token lifetime: 30 minutes.
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Maximum age of a signed federation state: 5 minutes.
pub const STATE_MAX_AGE: Duration = Duration::from_secs(5 * 60);
/// Lifetime of parked WebAuthn ceremony state: 5 minutes.
pub const CEREMONY_TTL: Duration = Duration::from_secs(5 * 60);
/// Lifetime of emailed one-time codes: 15 minutes.
pub const CODE_TTL: Duration = Duration::from_secs(15 * 60);
/// Lifetime of read-through cache entries.
pub const READ_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
/// Deadline applied to each store and cache call.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);
/// bcrypt cost factor.
pub const BCRYPT_COST: u32 = 10;

/// Token signing settings.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// WebAuthn relying-party settings.
#[derive(Clone, Debug)]
pub struct WebAuthnConfig {
    /// Relying-party ID (the bare domain).
    pub rp_id: String,
    /// Display name shown by authenticators.
    pub rp_name: String,
    /// Primary origin, `scheme://domain`.
    pub origin: String,
    /// Additional allowed origins.
    pub extra_origins: Vec<String>,
    pub ceremony_ttl: Duration,
}

/// Client credentials for one external identity provider.
#[derive(Clone, Debug)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

/// Provider credentials by provider and flow. Absent entries are not registered.
#[derive(Clone, Debug, Default)]
pub struct ProvidersConfig {
    pub google_oauth2: Option<ProviderCredentials>,
    pub google_oidc: Option<ProviderCredentials>,
    pub github_oauth2: Option<ProviderCredentials>,
}

/// Configuration consumed by the orchestrator and the services it composes.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub service_name: String,
    pub jwt: JwtConfig,
    /// HMAC secret for signed federation state.
    pub state_secret: String,
    pub state_max_age: Duration,
    /// Where the client is sent after a federated login.
    pub success_url: String,
    pub webauthn: WebAuthnConfig,
    pub providers: ProvidersConfig,
    /// reCAPTCHA secret; captcha checks are disabled when `None`.
    pub captcha_secret: Option<String>,
    pub code_ttl: Duration,
    pub read_cache_ttl: Duration,
    pub io_timeout: Duration,
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                   | Default                            |
    /// |----------------------------|------------------------------------|
    /// | `SERVICE_NAME`             | `sso`                              |
    /// | `JWT_SECRET`               | generated & persisted to file      |
    /// | `JWT_ISSUER`               | value of `SERVICE_NAME`            |
    /// | `PROVIDER_SECRET`          | generated & persisted to file      |
    /// | `PROVIDER_SUCCESS_URL`     | `<scheme>://<domain>/`             |
    /// | `SERVER_SCHEME`            | `http`                             |
    /// | `SERVER_DOMAIN`            | `localhost`                        |
    /// | `WEBAUTHN_ORIGINS`         | empty (comma separated)            |
    /// | `CAPTCHA_SECRET`           | unset (captcha disabled)           |
    /// | `OAUTH2_GOOGLE_*`, `OIDC_GOOGLE_*`, `OAUTH2_GITHUB_*` | unset   |
    pub fn from_env() -> Self {
        let service_name = env_or("SERVICE_NAME", "sso");
        let scheme = env_or("SERVER_SCHEME", "http");
        let domain = env_or("SERVER_DOMAIN", "localhost");
        let origin = format!("{scheme}://{domain}");

        Self {
            jwt: JwtConfig {
                secret: resolve_secret("JWT_SECRET", "jwt-secret"),
                issuer: env_or("JWT_ISSUER", &service_name),
                access_ttl: ACCESS_TOKEN_TTL,
                refresh_ttl: REFRESH_TOKEN_TTL,
            },
            state_secret: resolve_secret("PROVIDER_SECRET", "state-secret"),
            state_max_age: STATE_MAX_AGE,
            success_url: env_or("PROVIDER_SUCCESS_URL", &format!("{origin}/")),
            webauthn: WebAuthnConfig {
                rp_id: domain,
                rp_name: service_name.clone(),
                origin,
                extra_origins: split_list(&env_or("WEBAUTHN_ORIGINS", ""), ','),
                ceremony_ttl: CEREMONY_TTL,
            },
            providers: ProvidersConfig {
                google_oauth2: provider_from_env("OAUTH2_GOOGLE"),
                google_oidc: provider_from_env("OIDC_GOOGLE"),
                github_oauth2: provider_from_env("OAUTH2_GITHUB"),
            },
            captcha_secret: std::env::var("CAPTCHA_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            code_ttl: CODE_TTL,
            read_cache_ttl: READ_CACHE_TTL,
            io_timeout: IO_TIMEOUT,
            bcrypt_cost: BCRYPT_COST,
            service_name,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Reads `<PREFIX>_CLIENT_ID`, `_CLIENT_SECRET`, `_REDIRECT_URL` and `_SCOPES`
/// (space separated). Returns `None` unless both client ID and secret are set.
fn provider_from_env(prefix: &str) -> Option<ProviderCredentials> {
    let client_id = std::env::var(format!("{prefix}_CLIENT_ID")).ok()?;
    let client_secret = std::env::var(format!("{prefix}_CLIENT_SECRET")).ok()?;
    if client_id.is_empty() || client_secret.is_empty() {
        return None;
    }
    Some(ProviderCredentials {
        client_id,
        client_secret,
        redirect_url: env_or(&format!("{prefix}_REDIRECT_URL"), ""),
        scopes: split_list(&env_or(&format!("{prefix}_SCOPES"), ""), ' '),
    })
}

/// Resolve a signing secret: env var `name` → persisted file → freshly generated.
pub fn resolve_secret(name: &str, file_name: &str) -> String {
    if let Ok(secret) = std::env::var(name)
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = secret_path(file_name);
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new {name}");
    secret
}

fn secret_path(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sso")
        .join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" https://a.example , ,https://b.example", ','),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(split_list("", ',').is_empty());
    }

    #[test]
    fn ttl_policy() {
        assert_eq!(ACCESS_TOKEN_TTL.as_secs(), 1800);
        assert_eq!(REFRESH_TOKEN_TTL.as_secs(), 604_800);
        assert!(ACCESS_TOKEN_TTL < REFRESH_TOKEN_TTL);
    }
}
