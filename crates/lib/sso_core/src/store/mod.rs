//! Persistence contracts consumed by the orchestrator.
//!
//! The orchestrator depends on four narrow traits: [`UserStore`],
//! [`SessionRegistry`], [`FederationStore`] and [`PasskeyStore`].
//! [`postgres::PgStore`] is the production backend; [`memory::MemoryStore`]
//! implements the same contracts in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{NewUser, User};
use crate::models::federation::FederatedIdentity;
use crate::models::session::Device;
use crate::models::webauthn::WebAuthnCredential;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Other(String),
}

/// SHA-256 hex digest of a refresh token, the form in which it is stored.
pub fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time comparison of a stored digest against a presented raw token.
pub fn token_matches(stored_hash: &str, raw: &str) -> bool {
    hash_token(raw).as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

/// Local accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Create an account. Fails with [`StoreError::Conflict`] on a duplicate email.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;

    async fn set_passwordless_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError>;
}

/// Device-bound refresh sessions and the devices they are bound to.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Upsert `device` and insert a session bound to it, atomically.
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        device: &Device,
    ) -> Result<(), StoreError>;

    /// Whether `raw_token` matches the most recent live session for
    /// `(user_id, device)`. Absence and mismatch both return `false`.
    async fn is_session_valid(
        &self,
        user_id: Uuid,
        device: &Device,
        raw_token: &str,
    ) -> Result<bool, StoreError>;

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<(), StoreError>;

    async fn revoke_session(&self, user_id: Uuid, device_id: &str) -> Result<(), StoreError>;

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>, StoreError>;

    /// Fails with [`StoreError::NotFound`] if the user has no such device.
    async fn get_device(&self, user_id: Uuid, device_id: &str) -> Result<Device, StoreError>;

    /// Rename a device. Fails with [`StoreError::NotFound`] if absent.
    async fn update_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Revoke the device's sessions, then delete it.
    /// Fails with [`StoreError::NotFound`] if absent.
    async fn delete_device(&self, user_id: Uuid, device_id: &str) -> Result<(), StoreError>;
}

/// Links between local accounts and external identity-provider accounts.
#[async_trait]
pub trait FederationStore: Send + Sync {
    async fn find_user_by_federated_id(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Link `identity` to `user_id`, replacing stored provider tokens if a
    /// link already exists.
    async fn link_identity(
        &self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError>;
}

/// Registered WebAuthn credentials.
#[async_trait]
pub trait PasskeyStore: Send + Sync {
    async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>, StoreError>;

    async fn create_credential(&self, credential: &WebAuthnCredential) -> Result<(), StoreError>;

    /// Replace the serialized credential (counter, backup state) and stamp
    /// `last_used_at`. Fails with [`StoreError::NotFound`] if absent.
    async fn update_credential(
        &self,
        user_id: Uuid,
        credential_id: &str,
        credential: &str,
    ) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] if absent.
    async fn delete_credential(&self, user_id: Uuid, credential_id: &str)
    -> Result<(), StoreError>;
}
