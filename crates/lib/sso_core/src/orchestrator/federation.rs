//! OAuth2 / OIDC login through an external identity provider.

use tracing::{debug, info};

use super::Authenticator;
use crate::auth::AuthError;
use crate::federation::Flow;
use crate::models::auth::{NewUser, TokenPair, User};
use crate::models::federation::FederatedIdentity;
use crate::models::session::Device;

/// Tokens from a completed federated login plus where to send the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedLogin {
    pub tokens: TokenPair,
    pub success_url: String,
}

impl Authenticator {
    /// Authorization URL for `provider`, carrying a freshly signed state.
    pub async fn authorization_url(&self, provider: &str, flow: Flow) -> Result<String, AuthError> {
        let idp = self.providers.get(provider, flow)?;
        let state = self.state_signer.generate()?;
        Ok(idp.authorization_url(&state).await?)
    }

    /// Finish a redirect flow.
    ///
    /// The state is checked before anything else; nothing is exchanged or
    /// issued for a forged or stale state.
    pub async fn handle_callback(
        &self,
        device: &Device,
        provider: &str,
        flow: Flow,
        code: &str,
        state: &str,
    ) -> Result<FederatedLogin, AuthError> {
        self.state_signer.validate(state, self.config.state_max_age)?;
        let idp = self.providers.get(provider, flow)?;
        let identity = idp.exchange(code).await?;
        let user = self.resolve_account(&identity).await?;
        let tokens = self.issue_session(&user, device).await?;
        info!(user_id = %user.id, provider, %flow, "federated login");
        Ok(FederatedLogin {
            tokens,
            success_url: self.config.success_url.clone(),
        })
    }

    /// Map an external identity to a local account: an existing link wins,
    /// then an account with the same email, then a new account.
    async fn resolve_account(&self, identity: &FederatedIdentity) -> Result<User, AuthError> {
        if let Some(user) = self
            .deadline(
                self.federation
                    .find_user_by_federated_id(&identity.provider, &identity.provider_id),
            )
            .await?
        {
            debug!(user_id = %user.id, "existing federated link");
            self.deadline(self.federation.link_identity(user.id, identity)).await?;
            return Ok(user);
        }

        let user = match self.user_by_email(&identity.email).await? {
            Some(user) => {
                debug!(user_id = %user.id, "linking provider to existing account");
                user
            }
            None => {
                let user = self
                    .deadline(self.users.create_user(NewUser {
                        email: identity.email.clone(),
                        name: identity.name.clone(),
                        avatar: identity.picture.clone(),
                        password_hash: None,
                    }))
                    .await?;
                info!(user_id = %user.id, provider = %identity.provider, "account created from provider");
                user
            }
        };
        self.deadline(self.federation.link_identity(user.id, identity)).await?;
        Ok(user)
    }
}
