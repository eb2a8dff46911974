//! Emailed one-time codes: second-factor login and password recovery.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Authenticator, generate_code, user_cache_key};
use crate::auth::AuthError;
use crate::cache::{CacheError, CacheExt};
use crate::models::auth::TokenPair;
use crate::models::session::Device;

/// Result of [`Authenticator::send_login_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginCodeOutcome {
    /// The device already holds a session for this user; tokens were issued
    /// without a code.
    Issued(TokenPair),
    /// A code was emailed and must be confirmed with
    /// [`Authenticator::check_login_code`].
    CodeSent,
}

fn login_code_key(email: &str) -> String {
    format!("code:{}", email.trim().to_ascii_lowercase())
}

fn recovery_code_key(user_id: Uuid) -> String {
    format!("recovery:{user_id}")
}

/// Checks allowed against one code key within the code lifetime.
const MAX_CODE_ATTEMPTS: u64 = 5;

fn attempts_key(code_key: &str) -> String {
    format!("attempts:{code_key}")
}

impl Authenticator {
    // -------------------------------------------------------------------------
    // Login codes
    // -------------------------------------------------------------------------

    /// Verify the password, then either issue tokens directly for a device
    /// the user has signed in from before or email a four-digit code.
    pub async fn send_login_code(
        &self,
        device: &Device,
        email: &str,
        password: &str,
    ) -> Result<LoginCodeOutcome, AuthError> {
        let user = self.check_password(email, password).await?;

        match self.deadline(self.sessions.get_device(user.id, &device.id)).await {
            Ok(_) => {
                let pair = self.issue_session(&user, device).await?;
                info!(user_id = %user.id, device_id = %device.id, "known device, code skipped");
                return Ok(LoginCodeOutcome::Issued(pair));
            }
            Err(AuthError::NotFound) => {}
            Err(e) => warn!(user_id = %user.id, error = %e, "device lookup failed, sending code"),
        }

        let code = generate_code();
        self.deadline(self.cache.set(
            &login_code_key(email),
            code.to_string(),
            self.config.code_ttl,
        ))
        .await?;

        let mailer = Arc::clone(&self.mailer);
        let to = user.email.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_login_code(&to, code).await {
                warn!(error = %e, "login code email failed");
            }
        });
        info!(user_id = %user.id, "login code sent");
        Ok(LoginCodeOutcome::CodeSent)
    }

    /// Exchange an emailed login code for tokens. The code is single use.
    pub async fn check_login_code(
        &self,
        device: &Device,
        email: &str,
        code: u32,
    ) -> Result<TokenPair, AuthError> {
        self.consume_code(&login_code_key(email), code).await?;
        let user = self.user_by_email(email).await?.ok_or(AuthError::NotFound)?;
        let pair = self.issue_session(&user, device).await?;
        info!(user_id = %user.id, device_id = %device.id, "login code accepted");
        Ok(pair)
    }

    /// Compare `supplied` with the code stored at `key` and remove it on a
    /// match. A missing, expired or unreadable code is `CodeNotValid`, as is
    /// any check past [`MAX_CODE_ATTEMPTS`] within the code lifetime.
    async fn consume_code(&self, key: &str, supplied: u32) -> Result<(), AuthError> {
        let attempts = attempts_key(key);
        match tokio::time::timeout(
            self.config.io_timeout,
            self.cache.incr(&attempts, self.config.code_ttl),
        )
        .await
        {
            Ok(Ok(n)) if n <= MAX_CODE_ATTEMPTS => {}
            Ok(Ok(_)) => {
                warn!(key, "code attempts exhausted");
                self.forget(key);
                return Err(AuthError::CodeNotValid);
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "code attempt count failed");
                return Err(AuthError::CodeNotValid);
            }
            Err(_) => {
                warn!(key, "code attempt count timed out");
                return Err(AuthError::CodeNotValid);
            }
        }

        let expected = self.read_code(key, false).await?;
        if !bool::from(expected.ct_eq(&supplied)) {
            return Err(AuthError::CodeNotValid);
        }
        // Whoever removes the code owns it. A concurrent caller, or a code
        // re-issued in between, fails here.
        let taken = self.read_code(key, true).await?;
        if !bool::from(taken.ct_eq(&supplied)) {
            return Err(AuthError::CodeNotValid);
        }
        self.forget(&attempts);
        Ok(())
    }

    /// Read (or, with `take`, remove) the code at `key`, mapping every
    /// failure to `CodeNotValid`.
    async fn read_code(&self, key: &str, take: bool) -> Result<u32, AuthError> {
        let lookup = async {
            if take {
                self.cache.take_code(key).await
            } else {
                self.cache.get_code(key).await
            }
        };
        match tokio::time::timeout(self.config.io_timeout, lookup).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(CacheError::NotFound)) => {
                debug!(key, "no pending code");
                Err(AuthError::CodeNotValid)
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "code lookup failed");
                Err(AuthError::CodeNotValid)
            }
            Err(_) => {
                warn!(key, "code lookup timed out");
                Err(AuthError::CodeNotValid)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Password recovery
    // -------------------------------------------------------------------------

    /// Email a recovery code to the owner of `email`.
    pub async fn send_forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.user_by_email(email).await? else {
            debug!("recovery for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let code = generate_code();
        self.deadline(self.cache.set(
            &recovery_code_key(user.id),
            code.to_string(),
            self.config.code_ttl,
        ))
        .await?;

        let mailer = Arc::clone(&self.mailer);
        let (to, user_id) = (user.email.clone(), user.id);
        tokio::spawn(async move {
            if let Err(e) = mailer.send_password_reset(&to, user_id, code).await {
                warn!(error = %e, "recovery email failed");
            }
        });
        info!(user_id = %user.id, "recovery code sent");
        Ok(())
    }

    /// Set a new password with a recovery code, revoking every session.
    pub async fn reset_password(
        &self,
        user_id: Uuid,
        code: u32,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.consume_code(&recovery_code_key(user_id), code).await?;
        let hash = self.hash_password(new_password).await?;
        self.deadline(self.users.update_password(user_id, &hash)).await?;
        self.deadline(self.sessions.revoke_all_sessions(user_id)).await?;
        self.forget(&user_cache_key(user_id));
        info!(%user_id, "password reset");
        Ok(())
    }
}
