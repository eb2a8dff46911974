//! OAuth2 authorization-code providers that identify the user through a
//! user-info API (Google, GitHub).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use super::{FederationError, Flow, IdentityProvider};
use crate::config::ProviderCredentials;
use crate::models::federation::FederatedIdentity;

// =============================================================================
// Endpoints
// =============================================================================

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const GITHUB_USER_URL: &str = "https://api.github.com/user";

const GITHUB_API_VERSION: &str = "2022-11-28";

/// Where a provider's authorization, token and profile APIs live.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

/// How the external profile is read after the code exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileApi {
    Google,
    GitHub,
}

// =============================================================================
// Token exchange
// =============================================================================

/// Response from an OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Exchange an authorization code at `token_url`.
pub(crate) async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    creds: &ProviderCredentials,
    code: &str,
) -> Result<TokenResponse, FederationError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("redirect_uri", creds.redirect_url.as_str()),
    ];

    let resp = client
        .post(token_url)
        .header(ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| FederationError::Exchange(format!("token request failed: {e}")))?;

    let status = resp.status();
    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| FederationError::Exchange(format!("token response ({status}): {e}")))?;

    // Some providers report failures with a 200 and an `error` field.
    if let Some(error) = body.error {
        let description = body.error_description.unwrap_or_default();
        return Err(FederationError::Exchange(format!("{error}: {description}")));
    }
    if !status.is_success() || body.access_token.is_empty() {
        return Err(FederationError::Exchange(format!(
            "token endpoint returned {status} without an access token"
        )));
    }
    Ok(body)
}

/// Build an authorization URL with the standard code-flow parameters.
pub(crate) fn build_authorization_url(
    auth_url: &str,
    creds: &ProviderCredentials,
    scopes: &[String],
    state: &str,
) -> Result<String, FederationError> {
    let scope = scopes.join(" ");
    let url = url::Url::parse_with_params(
        auth_url,
        &[
            ("client_id", creds.client_id.as_str()),
            ("redirect_uri", creds.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state),
        ],
    )
    .map_err(|e| FederationError::Config(format!("authorization url: {e}")))?;
    Ok(url.to_string())
}

// =============================================================================
// Profiles
// =============================================================================

struct Profile {
    id: String,
    email: String,
    name: String,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

// =============================================================================
// Provider
// =============================================================================

/// An OAuth2 provider with a user-info API.
pub struct OAuth2Provider {
    name: String,
    client: reqwest::Client,
    creds: ProviderCredentials,
    endpoints: Endpoints,
    profile_api: ProfileApi,
    default_scopes: Vec<String>,
}

impl OAuth2Provider {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        creds: ProviderCredentials,
        endpoints: Endpoints,
        profile_api: ProfileApi,
    ) -> Self {
        let default_scopes = match profile_api {
            ProfileApi::Google => vec![
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
            ],
            ProfileApi::GitHub => vec!["read:user".to_string(), "user:email".to_string()],
        };
        Self {
            name: name.into(),
            client,
            creds,
            endpoints,
            profile_api,
            default_scopes,
        }
    }

    pub fn google(client: reqwest::Client, creds: ProviderCredentials) -> Self {
        Self::new(
            "google",
            client,
            creds,
            Endpoints {
                auth_url: GOOGLE_AUTH_URL.into(),
                token_url: GOOGLE_TOKEN_URL.into(),
                userinfo_url: GOOGLE_USERINFO_URL.into(),
            },
            ProfileApi::Google,
        )
    }

    pub fn github(client: reqwest::Client, creds: ProviderCredentials) -> Self {
        Self::new(
            "github",
            client,
            creds,
            Endpoints {
                auth_url: GITHUB_AUTH_URL.into(),
                token_url: GITHUB_TOKEN_URL.into(),
                userinfo_url: GITHUB_USER_URL.into(),
            },
            ProfileApi::GitHub,
        )
    }

    fn scopes(&self) -> &[String] {
        if self.creds.scopes.is_empty() {
            &self.default_scopes
        } else {
            &self.creds.scopes
        }
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, FederationError> {
        match self.profile_api {
            ProfileApi::Google => self.fetch_google(access_token).await,
            ProfileApi::GitHub => self.fetch_github(access_token).await,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned + Send>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, FederationError> {
        let mut req = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(USER_AGENT, "sso");
        if self.profile_api == ProfileApi::GitHub {
            req = req
                .header(ACCEPT, "application/vnd.github+json")
                .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| FederationError::Profile(format!("{url}: {e}")))?
            .error_for_status()
            .map_err(|e| FederationError::Profile(format!("{url}: {e}")))?;
        resp.json()
            .await
            .map_err(|e| FederationError::Profile(format!("{url}: {e}")))
    }

    async fn fetch_google(&self, access_token: &str) -> Result<Profile, FederationError> {
        let user: GoogleUser = self
            .get_json(&self.endpoints.userinfo_url, access_token)
            .await?;
        Ok(Profile {
            id: user.id,
            email: user.email,
            name: user.name,
            picture: user.picture,
        })
    }

    async fn fetch_github(&self, access_token: &str) -> Result<Profile, FederationError> {
        let user: GitHubUser = self
            .get_json(&self.endpoints.userinfo_url, access_token)
            .await?;

        // The public profile email is optional; fall back to the primary
        // verified address.
        let email = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => {
                let emails_url = format!("{}/emails", self.endpoints.userinfo_url);
                let emails: Vec<GitHubEmail> = self.get_json(&emails_url, access_token).await?;
                emails
                    .into_iter()
                    .find(|e| e.primary && e.verified)
                    .map(|e| e.email)
                    .ok_or_else(|| {
                        FederationError::Profile("no primary verified email".into())
                    })?
            }
        };

        Ok(Profile {
            id: user.id.to_string(),
            email,
            name: user.name.filter(|n| !n.is_empty()).unwrap_or(user.login),
            picture: user.avatar_url,
        })
    }
}

#[async_trait]
impl IdentityProvider for OAuth2Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn flow(&self) -> Flow {
        Flow::OAuth2
    }

    async fn authorization_url(&self, state: &str) -> Result<String, FederationError> {
        build_authorization_url(&self.endpoints.auth_url, &self.creds, self.scopes(), state)
    }

    async fn exchange(&self, code: &str) -> Result<FederatedIdentity, FederationError> {
        let token =
            exchange_code(&self.client, &self.endpoints.token_url, &self.creds, code).await?;
        let profile = self.fetch_profile(&token.access_token).await?;
        if profile.email.is_empty() {
            return Err(FederationError::Profile("provider returned no email".into()));
        }
        debug!(provider = %self.name, provider_id = %profile.id, "exchanged authorization code");

        Ok(FederatedIdentity {
            provider: self.name.clone(),
            provider_id: profile.id,
            email: profile.email,
            name: profile.name,
            picture: profile.picture,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: token.id_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".into()),
            expiry: expiry_from(token.expires_in),
        })
    }
}

/// Absolute expiry for a token's `expires_in`. A value outside what chrono
/// can represent is treated as no expiry.
pub(super) fn expiry_from(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    let secs = expires_in?;
    let expiry = Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d));
    if expiry.is_none() {
        debug!(expires_in = secs, "ignoring out-of-range token lifetime");
    }
    expiry
}
