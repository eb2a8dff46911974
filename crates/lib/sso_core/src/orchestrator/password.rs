//! Password login, refresh rotation, logout and the current-user lookup.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Authenticator, user_cache_key};
use crate::auth::AuthError;
use crate::cache::CacheExt;
use crate::models::auth::{TokenPair, User};
use crate::models::session::Device;

impl Authenticator {
    // -------------------------------------------------------------------------
    // Password login
    // -------------------------------------------------------------------------

    /// Look up `email` and verify `password` against its stored hash.
    ///
    /// Unknown users, accounts without a password and mismatches all yield
    /// `InvalidCredentials`.
    pub(super) async fn check_password(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let Some(user) = self.user_by_email(email).await? else {
            debug!("login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        let Some(hash) = user.password_hash.as_deref() else {
            debug!(user_id = %user.id, "login for account without password");
            return Err(AuthError::InvalidCredentials);
        };
        self.verify_password(hash, password).await?;
        Ok(user)
    }

    /// Log in with email and password, binding a new session to `device`.
    pub async fn authenticate(
        &self,
        device: &Device,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, AuthError> {
        let user = self.check_password(email, password).await?;
        let pair = self.issue_session(&user, device).await?;
        info!(user_id = %user.id, device_id = %device.id, "password login");
        Ok(pair)
    }

    // -------------------------------------------------------------------------
    // Refresh / logout
    // -------------------------------------------------------------------------

    /// Rotate a refresh token.
    ///
    /// The presented token must be the newest live session for its user on
    /// `device`. On success every session of the user is revoked before the
    /// new one is recorded, so a refresh signs out all other devices.
    pub async fn refresh(&self, device: &Device, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.parse(refresh_token)?;
        let valid = self
            .deadline(self.sessions.is_session_valid(claims.sub, device, refresh_token))
            .await?;
        if !valid {
            warn!(user_id = %claims.sub, device_id = %device.id, "refresh with revoked token");
            return Err(AuthError::TokenRevoked);
        }

        let pair = self.tokens.mint_pair(claims.sub, &claims.roles)?;
        self.deadline(self.sessions.revoke_all_sessions(claims.sub)).await?;
        self.bind_session(claims.sub, &pair, device).await?;
        info!(user_id = %claims.sub, device_id = %device.id, "refresh token rotated");
        Ok(pair)
    }

    /// Revoke every session of `user_id`.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.deadline(self.sessions.revoke_all_sessions(user_id)).await?;
        info!(%user_id, "logged out");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Current user
    // -------------------------------------------------------------------------

    /// Resolve the user an access token belongs to, through the read cache.
    pub async fn current_user(&self, access_token: &str) -> Result<User, AuthError> {
        let claims = self.tokens.parse(access_token)?;
        self.user_by_id(claims.sub).await
    }

    pub(super) async fn user_by_id(&self, user_id: Uuid) -> Result<User, AuthError> {
        let key = user_cache_key(user_id);
        if let Ok(Ok(user)) =
            tokio::time::timeout(self.config.io_timeout, self.cache.get_json::<User>(&key)).await
        {
            return Ok(user);
        }

        let user = self
            .deadline(self.users.get_user_by_id(user_id))
            .await?
            .ok_or(AuthError::NotFound)?;
        match tokio::time::timeout(
            self.config.io_timeout,
            self.cache.set_json(&key, &user, self.config.read_cache_ttl),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%user_id, error = %e, "user cache fill failed"),
            Err(_) => warn!(%user_id, "user cache fill timed out"),
        }
        Ok(user)
    }
}
