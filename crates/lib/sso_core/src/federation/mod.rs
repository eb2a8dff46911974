//! Identity federation with external OAuth2 and OIDC providers.
//!
//! Providers implement [`IdentityProvider`] and are registered at startup in
//! a [`ProviderRegistry`] keyed by provider name and [`Flow`]. The redirect
//! round trip is protected by a stateless signed state (see [`state`]).

pub mod oauth2;
pub mod oidc;
pub mod state;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::ProvidersConfig;
use crate::models::federation::FederatedIdentity;

use self::oauth2::OAuth2Provider;
use self::oidc::OidcProvider;

/// Federation errors.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid state format")]
    InvalidStateFormat,

    #[error("Invalid state signature")]
    InvalidSignature,

    #[error("Invalid state data format")]
    InvalidDataFormat,

    #[error("State expired")]
    StateExpired,

    #[error("Code exchange failed: {0}")]
    Exchange(String),

    #[error("Profile fetch failed: {0}")]
    Profile(String),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Identity token rejected: {0}")]
    IdToken(String),

    #[error("Provider misconfigured: {0}")]
    Config(String),
}

/// The kind of redirect flow a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Authorization code plus a user-info endpoint.
    OAuth2,
    /// Authorization code plus a verified identity token.
    Oidc,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::OAuth2 => "oauth2",
            Flow::Oidc => "oidc",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flow {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oauth2" => Ok(Flow::OAuth2),
            "oidc" => Ok(Flow::Oidc),
            other => Err(FederationError::UnknownProvider(other.to_string())),
        }
    }
}

/// Capability every external identity provider offers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registry name, e.g. `google`.
    fn name(&self) -> &str;

    fn flow(&self) -> Flow;

    /// URL the user agent is redirected to, carrying `state`.
    async fn authorization_url(&self, state: &str) -> Result<String, FederationError>;

    /// Trade an authorization code for the external account and its tokens.
    async fn exchange(&self, code: &str) -> Result<FederatedIdentity, FederationError>;
}

/// Providers keyed by `(name, flow)`.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<(String, Flow), Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one with the same key.
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        info!(provider = provider.name(), flow = %provider.flow(), "registered identity provider");
        self.providers
            .insert((provider.name().to_string(), provider.flow()), provider);
    }

    pub fn get(&self, name: &str, flow: Flow) -> Result<Arc<dyn IdentityProvider>, FederationError> {
        self.providers
            .get(&(name.to_string(), flow))
            .cloned()
            .ok_or_else(|| FederationError::UnknownProvider(format!("{flow}/{name}")))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build the registry from configured client credentials. Providers
    /// without credentials are left out.
    pub fn from_config(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        if let Some(creds) = &config.google_oauth2 {
            registry.register(Arc::new(OAuth2Provider::google(client.clone(), creds.clone())));
        }
        if let Some(creds) = &config.github_oauth2 {
            registry.register(Arc::new(OAuth2Provider::github(client.clone(), creds.clone())));
        }
        if let Some(creds) = &config.google_oidc {
            registry.register(Arc::new(OidcProvider::google(client.clone(), creds.clone())));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;

    fn creds() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_url: "https://sso.example.com/callback".into(),
            scopes: vec![],
        }
    }

    #[test]
    fn flow_parses_and_displays() {
        assert_eq!("oauth2".parse::<Flow>().unwrap(), Flow::OAuth2);
        assert_eq!("oidc".parse::<Flow>().unwrap(), Flow::Oidc);
        assert!("saml".parse::<Flow>().is_err());
        assert_eq!(Flow::Oidc.to_string(), "oidc");
    }

    #[test]
    fn registry_is_keyed_by_name_and_flow() {
        let registry = ProviderRegistry::from_config(
            &ProvidersConfig {
                google_oauth2: Some(creds()),
                google_oidc: None,
                github_oauth2: Some(creds()),
            },
            reqwest::Client::new(),
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("google", Flow::OAuth2).unwrap().name(), "google");
        assert_eq!(registry.get("github", Flow::OAuth2).unwrap().name(), "github");
        assert!(matches!(
            registry.get("google", Flow::Oidc),
            Err(FederationError::UnknownProvider(_))
        ));
        assert!(matches!(
            registry.get("facebook", Flow::OAuth2),
            Err(FederationError::UnknownProvider(_))
        ));
    }

    #[test]
    fn empty_config_registers_nothing() {
        let registry =
            ProviderRegistry::from_config(&ProvidersConfig::default(), reqwest::Client::new());
        assert!(registry.is_empty());
    }
}
