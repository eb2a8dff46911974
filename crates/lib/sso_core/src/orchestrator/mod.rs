//! The authentication façade used by the transport layer.
//!
//! [`Authenticator`] composes the credential, token, federation and WebAuthn
//! services with the store, cache and mail collaborators. It holds no
//! mutable state of its own: sessions, codes and ceremony state live in the
//! store and cache, so any instance can serve any request.

mod codes;
mod devices;
mod federation;
mod passkeys;
mod password;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, warn};

use crate::auth::AuthError;
use crate::auth::captcha::{CaptchaAction, CaptchaVerifier, Recaptcha};
use crate::auth::jwt::{JwtIssuer, TokenIssuer};
use crate::auth::password::{BcryptHasher, PasswordHasher};
use crate::cache::Cache;
use crate::config::AuthConfig;
use crate::email::Mailer;
use crate::federation::ProviderRegistry;
use crate::federation::state::{HmacStateSigner, StateSigner};
use crate::models::auth::{TokenPair, User};
use crate::models::session::Device;
use crate::store::{FederationStore, PasskeyStore, SessionRegistry, UserStore, hash_token};
use crate::webauthn::{CeremonyManager, PasskeyCeremonies};

pub use codes::LoginCodeOutcome;
pub use federation::FederatedLogin;

/// Collaborators the orchestrator is built from.
pub struct AuthDeps {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub federation: Arc<dyn FederationStore>,
    pub passkeys: Arc<dyn PasskeyStore>,
    pub cache: Arc<dyn Cache>,
    pub mailer: Arc<dyn Mailer>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub state_signer: Arc<dyn StateSigner>,
    pub providers: ProviderRegistry,
    pub ceremonies: Arc<dyn CeremonyManager>,
    /// `None` disables captcha checks.
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
}

/// Authentication orchestrator.
pub struct Authenticator {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionRegistry>,
    federation: Arc<dyn FederationStore>,
    passkeys: Arc<dyn PasskeyStore>,
    cache: Arc<dyn Cache>,
    mailer: Arc<dyn Mailer>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
    state_signer: Arc<dyn StateSigner>,
    providers: ProviderRegistry,
    ceremonies: Arc<dyn CeremonyManager>,
    captcha: Option<Arc<dyn CaptchaVerifier>>,
}

impl Authenticator {
    pub fn new(config: AuthConfig, deps: AuthDeps) -> Self {
        Self {
            config,
            users: deps.users,
            sessions: deps.sessions,
            federation: deps.federation,
            passkeys: deps.passkeys,
            cache: deps.cache,
            mailer: deps.mailer,
            hasher: deps.hasher,
            tokens: deps.tokens,
            state_signer: deps.state_signer,
            providers: deps.providers,
            ceremonies: deps.ceremonies,
            captcha: deps.captcha,
        }
    }

    /// Wire the production services from `config` around one store that
    /// implements every persistence contract.
    pub fn from_config<S>(
        config: AuthConfig,
        store: Arc<S>,
        cache: Arc<dyn Cache>,
        mailer: Arc<dyn Mailer>,
        http: reqwest::Client,
    ) -> Result<Self, AuthError>
    where
        S: UserStore + SessionRegistry + FederationStore + PasskeyStore + 'static,
    {
        let ceremonies = PasskeyCeremonies::new(&config.webauthn)?;
        let captcha = config
            .captcha_secret
            .as_ref()
            .map(|secret| Arc::new(Recaptcha::new(http.clone(), secret)) as Arc<dyn CaptchaVerifier>);
        let deps = AuthDeps {
            users: store.clone(),
            sessions: store.clone(),
            federation: store.clone(),
            passkeys: store,
            cache,
            mailer,
            hasher: Arc::new(BcryptHasher::new(config.bcrypt_cost)),
            tokens: Arc::new(JwtIssuer::new(&config.jwt)),
            state_signer: Arc::new(HmacStateSigner::new(&config.state_secret)),
            providers: ProviderRegistry::from_config(&config.providers, http),
            ceremonies: Arc::new(ceremonies),
            captcha,
        };
        Ok(Self::new(config, deps))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify and decode an access token.
    pub fn parse_claims(&self, token: &str) -> Result<crate::models::auth::AccessClaims, AuthError> {
        self.tokens.parse(token)
    }

    /// Check a captcha token for `action`. Passes trivially when captcha is
    /// not configured.
    pub async fn verify_captcha(
        &self,
        token: Option<&str>,
        action: CaptchaAction,
    ) -> Result<(), AuthError> {
        let Some(captcha) = &self.captcha else {
            return Ok(());
        };
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::CaptchaRejected)?;
        captcha.verify(token, action).await
    }

    // -------------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------------

    /// Run a store or cache call under the configured deadline.
    async fn deadline<T, E, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AuthError>,
    {
        match tokio::time::timeout(self.config.io_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(AuthError::DeadlineExceeded),
        }
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::HashingFailure(format!("hash task: {e}")))?
    }

    async fn verify_password(&self, hash: &str, password: &str) -> Result<(), AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let (hash, password) = (hash.to_owned(), password.to_owned());
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| AuthError::HashingFailure(format!("verify task: {e}")))?
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.deadline(self.users.get_user_by_email(email)).await
    }

    /// Mint a token pair for `user` and bind its refresh token to `device`.
    async fn issue_session(&self, user: &User, device: &Device) -> Result<TokenPair, AuthError> {
        let pair = self.tokens.mint_pair(user.id, &user.roles)?;
        self.bind_session(user.id, &pair, device).await?;
        Ok(pair)
    }

    async fn bind_session(
        &self,
        user_id: uuid::Uuid,
        pair: &TokenPair,
        device: &Device,
    ) -> Result<(), AuthError> {
        let ttl = chrono::Duration::from_std(self.tokens.refresh_ttl())
            .map_err(|e| AuthError::Internal(format!("refresh ttl: {e}")))?;
        let expires_at = Utc::now() + ttl;
        self.deadline(self.sessions.create_session(
            user_id,
            &hash_token(&pair.refresh),
            expires_at,
            device,
        ))
        .await?;
        // The device may be new to this user.
        self.forget_pattern(&devices::devices_pattern(user_id));
        debug!(%user_id, device_id = %device.id, "session created");
        Ok(())
    }

    /// Delete `key` in the background. Failures are logged.
    fn forget(&self, key: &str) {
        let cache = Arc::clone(&self.cache);
        let timeout = self.config.io_timeout;
        let key = key.to_owned();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, cache.delete(&key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key = %key, error = %e, "cache delete failed"),
                Err(_) => warn!(key = %key, "cache delete timed out"),
            }
        });
    }

    /// Invalidate every key matching `pattern` in the background.
    fn forget_pattern(&self, pattern: &str) {
        let cache = Arc::clone(&self.cache);
        let timeout = self.config.io_timeout;
        let pattern = pattern.to_owned();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, cache.delete_by_pattern(&pattern)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(pattern = %pattern, error = %e, "cache invalidation failed"),
                Err(_) => warn!(pattern = %pattern, "cache invalidation timed out"),
            }
        });
    }
}

/// Four-digit one-time code.
fn generate_code() -> u32 {
    rand::rng().random_range(1000..=9999)
}

fn user_cache_key(user_id: uuid::Uuid) -> String {
    format!("user:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_have_four_digits() {
        for _ in 0..1000 {
            let code = generate_code();
            assert!((1000..=9999).contains(&code));
        }
    }
}
