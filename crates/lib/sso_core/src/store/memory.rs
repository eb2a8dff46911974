//! In-process implementation of the store contracts.
//!
//! All tables sit behind one mutex, so every trait method is atomic.
//! Suitable for development and tests; nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    FederationStore, PasskeyStore, SessionRegistry, StoreError, UserStore, token_matches,
};
use crate::models::auth::{NewUser, User};
use crate::models::federation::FederatedIdentity;
use crate::models::session::{Device, RefreshSession};
use crate::models::webauthn::WebAuthnCredential;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    /// (user_id, device_id) → device
    devices: HashMap<(Uuid, String), Device>,
    sessions: Vec<RefreshSession>,
    /// (provider, provider_id) → (user_id, identity)
    identities: HashMap<(String, String), (Uuid, FederatedIdentity)>,
    credentials: Vec<WebAuthnCredential>,
}

/// Memory-backed [`UserStore`], [`SessionRegistry`], [`FederationStore`]
/// and [`PasskeyStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Other("memory store poisoned".into()))
    }

    /// Grant a role to an existing user.
    pub fn grant_role(&self, user_id: Uuid, role: &str) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        if !user.roles.iter().any(|r| r == role) {
            user.roles.push(role.to_string());
        }
        Ok(())
    }

    /// All sessions recorded for a user, oldest first.
    pub fn sessions_for(&self, user_id: Uuid) -> Result<Vec<RefreshSession>, StoreError> {
        Ok(self
            .tables()?
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables()?.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables()?;
        if tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(StoreError::Conflict(format!("email {} taken", new.email)));
        }
        let user = User {
            id: Uuid::now_v7(),
            email: new.email,
            name: new.name,
            avatar: new.avatar,
            password_hash: new.password_hash,
            roles: vec!["user".into()],
            passwordless_enabled: false,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn set_passwordless_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.passwordless_enabled = enabled;
        Ok(())
    }
}

#[async_trait]
impl SessionRegistry for MemoryStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        device: &Device,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let now = Utc::now();
        tables
            .devices
            .entry((user_id, device.id.clone()))
            .and_modify(|d| d.last_active = Some(now))
            .or_insert_with(|| Device {
                last_active: Some(now),
                ..device.clone()
            });
        let id = tables.sessions.len() as i64 + 1;
        tables.sessions.push(RefreshSession {
            id,
            user_id,
            token_hash: token_hash.to_string(),
            device_id: device.id.clone(),
            expires_at,
            revoked: false,
            last_used_at: None,
            created_at: now,
        });
        Ok(())
    }

    async fn is_session_valid(
        &self,
        user_id: Uuid,
        device: &Device,
        raw_token: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        let now = Utc::now();
        let latest = tables
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.device_id == device.id && s.is_live(now))
            .max_by_key(|s| s.id);
        match latest {
            Some(session) if token_matches(&session.token_hash, raw_token) => {
                session.last_used_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for session in tables.sessions.iter_mut().filter(|s| s.user_id == user_id) {
            session.revoked = true;
        }
        Ok(())
    }

    async fn revoke_session(&self, user_id: Uuid, device_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for session in tables
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.device_id == device_id)
        {
            session.revoked = true;
        }
        Ok(())
    }

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>, StoreError> {
        let tables = self.tables()?;
        let mut devices: Vec<Device> = tables
            .devices
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|(_, d)| d.clone())
            .collect();
        devices.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(devices)
    }

    async fn get_device(&self, user_id: Uuid, device_id: &str) -> Result<Device, StoreError> {
        self.tables()?
            .devices
            .get(&(user_id, device_id.to_string()))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let device = tables
            .devices
            .get_mut(&(user_id, device_id.to_string()))
            .ok_or(StoreError::NotFound)?;
        device.name = name.to_string();
        Ok(())
    }

    async fn delete_device(&self, user_id: Uuid, device_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for session in tables
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.device_id == device_id)
        {
            session.revoked = true;
        }
        tables
            .devices
            .remove(&(user_id, device_id.to_string()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl FederationStore for MemoryStore {
    async fn find_user_by_federated_id(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .identities
            .get(&(provider.to_string(), provider_id.to_string()))
            .and_then(|(uid, _)| tables.users.get(uid).cloned()))
    }

    async fn link_identity(
        &self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        tables.identities.insert(
            (identity.provider.clone(), identity.provider_id.clone()),
            (user_id, identity.clone()),
        );
        Ok(())
    }
}

#[async_trait]
impl PasskeyStore for MemoryStore {
    async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>, StoreError> {
        Ok(self
            .tables()?
            .credentials
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_credential(&self, credential: &WebAuthnCredential) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if tables.credentials.iter().any(|c| c.id == credential.id) {
            return Err(StoreError::Conflict(format!(
                "credential {} already registered",
                credential.id
            )));
        }
        tables.credentials.push(credential.clone());
        Ok(())
    }

    async fn update_credential(
        &self,
        user_id: Uuid,
        credential_id: &str,
        credential: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let stored = tables
            .credentials
            .iter_mut()
            .find(|c| c.user_id == user_id && c.id == credential_id)
            .ok_or(StoreError::NotFound)?;
        stored.credential = credential.to_string();
        stored.last_used_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_credential(
        &self,
        user_id: Uuid,
        credential_id: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let before = tables.credentials.len();
        tables
            .credentials
            .retain(|c| !(c.user_id == user_id && c.id == credential_id));
        if tables.credentials.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
