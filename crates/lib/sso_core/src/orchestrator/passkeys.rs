//! WebAuthn registration and passwordless login.

use tracing::{debug, info};
use uuid::Uuid;

use super::Authenticator;
use crate::auth::AuthError;
use crate::models::auth::TokenPair;
use crate::models::session::Device;
use crate::models::webauthn::{CeremonyKind, WebAuthnCredential};
use crate::webauthn::ceremony_key;

impl Authenticator {
    // -------------------------------------------------------------------------
    // Ceremony state
    // -------------------------------------------------------------------------

    async fn park_ceremony(&self, kind: CeremonyKind, user_id: Uuid, state: String) -> Result<(), AuthError> {
        self.deadline(self.cache.set(
            &ceremony_key(kind, user_id),
            state,
            self.config.webauthn.ceremony_ttl,
        ))
        .await
    }

    /// Remove and return parked state. Only one caller can take a given
    /// ceremony; the rest get `NotFound`.
    async fn take_ceremony(&self, kind: CeremonyKind, user_id: Uuid) -> Result<String, AuthError> {
        match self.deadline(self.cache.take(&ceremony_key(kind, user_id))).await {
            Err(AuthError::NotFound) => {
                debug!(%user_id, %kind, "no parked ceremony");
                Err(AuthError::NotFound)
            }
            other => other,
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Start registering a passkey for `user_id`. Returns the options for
    /// `navigator.credentials.create()`.
    pub async fn begin_passkey_registration(&self, user_id: Uuid) -> Result<serde_json::Value, AuthError> {
        let user = self.user_by_id(user_id).await?;
        let existing = self.deadline(self.passkeys.list_credentials(user_id)).await?;
        let ceremony = self.ceremonies.begin_registration(&user, &existing)?;
        self.park_ceremony(CeremonyKind::Registration, user_id, ceremony.state)
            .await?;
        debug!(%user_id, "passkey registration started");
        Ok(ceremony.challenge)
    }

    /// Verify the attestation in `response` and store the new credential.
    pub async fn finish_passkey_registration(
        &self,
        user_id: Uuid,
        response: &[u8],
    ) -> Result<WebAuthnCredential, AuthError> {
        let state = self.take_ceremony(CeremonyKind::Registration, user_id).await?;
        let credential = self
            .ceremonies
            .finish_registration(user_id, &state, response)?;
        self.deadline(self.passkeys.create_credential(&credential))
            .await?;
        self.deadline(self.users.set_passwordless_enabled(user_id, true))
            .await?;
        self.forget(&super::user_cache_key(user_id));
        info!(%user_id, credential_id = %credential.id, "passkey registered");
        Ok(credential)
    }

    // -------------------------------------------------------------------------
    // Login
    // -------------------------------------------------------------------------

    /// Start a passkey login for `email`. Returns the options for
    /// `navigator.credentials.get()`.
    pub async fn begin_passkey_login(&self, email: &str) -> Result<serde_json::Value, AuthError> {
        let user = self.user_by_email(email).await?.ok_or(AuthError::NotFound)?;
        let credentials = self.deadline(self.passkeys.list_credentials(user.id)).await?;
        if credentials.is_empty() {
            return Err(AuthError::NotFound);
        }
        let ceremony = self.ceremonies.begin_login(&credentials)?;
        self.park_ceremony(CeremonyKind::Login, user.id, ceremony.state)
            .await?;
        debug!(user_id = %user.id, "passkey login started");
        Ok(ceremony.challenge)
    }

    /// Verify the assertion in `response` and issue a session for `device`.
    pub async fn finish_passkey_login(
        &self,
        device: &Device,
        email: &str,
        response: &[u8],
    ) -> Result<TokenPair, AuthError> {
        let user = self.user_by_email(email).await?.ok_or(AuthError::NotFound)?;
        let state = self.take_ceremony(CeremonyKind::Login, user.id).await?;
        let credentials = self.deadline(self.passkeys.list_credentials(user.id)).await?;
        let assertion = self
            .ceremonies
            .finish_login(&state, &credentials, response)?;

        // Persist the new counter, or just stamp last use.
        let stored = assertion.updated_credential.or_else(|| {
            credentials
                .iter()
                .find(|c| c.id == assertion.credential_id)
                .map(|c| c.credential.clone())
        });
        if let Some(stored) = stored {
            self.deadline(self.passkeys.update_credential(
                user.id,
                &assertion.credential_id,
                &stored,
            ))
            .await?;
        }

        let pair = self.issue_session(&user, device).await?;
        info!(user_id = %user.id, device_id = %device.id, "passkey login");
        Ok(pair)
    }

    // -------------------------------------------------------------------------
    // Credential maintenance
    // -------------------------------------------------------------------------

    pub async fn list_passkeys(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>, AuthError> {
        self.deadline(self.passkeys.list_credentials(user_id)).await
    }

    /// Remove a credential; clears the passwordless flag with the last one.
    pub async fn delete_passkey(&self, user_id: Uuid, credential_id: &str) -> Result<(), AuthError> {
        self.deadline(self.passkeys.delete_credential(user_id, credential_id))
            .await?;
        let remaining = self.deadline(self.passkeys.list_credentials(user_id)).await?;
        if remaining.is_empty() {
            self.deadline(self.users.set_passwordless_enabled(user_id, false))
                .await?;
            self.forget(&super::user_cache_key(user_id));
        }
        info!(%user_id, credential_id, "passkey deleted");
        Ok(())
    }
}
