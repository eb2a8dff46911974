//! Postgres implementation of the store contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{
    FederationStore, PasskeyStore, SessionRegistry, StoreError, UserStore, token_matches,
};
use crate::models::auth::{NewUser, User};
use crate::models::federation::FederatedIdentity;
use crate::models::session::Device;
use crate::models::webauthn::WebAuthnCredential;
use crate::secrets::TokenCipher;

/// Role granted to every new account.
const DEFAULT_ROLE: &str = "user";

const USER_COLUMNS: &str = "u.id, u.email, u.name, u.avatar, u.password_hash, \
     u.passwordless_enabled, u.created_at, \
     COALESCE(ARRAY(SELECT r.role FROM user_roles r WHERE r.user_id = u.id ORDER BY r.role), \
              '{}') AS roles";

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    avatar: Option<String>,
    password_hash: Option<String>,
    passwordless_enabled: bool,
    created_at: DateTime<Utc>,
    roles: Vec<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            password_hash: row.password_hash,
            roles: row.roles,
            passwordless_enabled: row.passwordless_enabled,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct DeviceRow {
    id: String,
    name: String,
    device_type: String,
    os: String,
    browser: String,
    user_agent: String,
    ip: String,
    last_active: DateTime<Utc>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.id,
            name: row.name,
            device_type: row.device_type,
            os: row.os,
            browser: row.browser,
            user_agent: row.user_agent,
            ip: row.ip,
            last_active: Some(row.last_active),
        }
    }
}

#[derive(FromRow)]
struct CredentialRow {
    id: String,
    user_id: Uuid,
    credential: String,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<CredentialRow> for WebAuthnCredential {
    fn from(row: CredentialRow) -> Self {
        WebAuthnCredential {
            id: row.id,
            user_id: row.user_id,
            credential: row.credential,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// Postgres-backed store. Provider tokens are sealed with `cipher` before
/// they are written.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    cipher: TokenCipher,
}

impl PgStore {
    pub fn new(pool: PgPool, cipher: TokenCipher) -> Self {
        Self { pool, cipher }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_user(&self, filter: &str, bind: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE {filter}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.fetch_user("u.id = $1::uuid", &id.to_string()).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("lower(u.email) = lower($1)", email).await
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let id = Uuid::now_v7();
        let mut tx = self.pool.begin().await?;

        let created_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "INSERT INTO users (id, email, name, avatar, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING created_at",
        )
        .bind(id)
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.avatar)
        .bind(&new.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("email {} taken", new.email))
            } else {
                StoreError::Db(e)
            }
        })?;

        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
            .bind(id)
            .bind(DEFAULT_ROLE)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(User {
            id,
            email: new.email,
            name: new.name,
            avatar: new.avatar,
            password_hash: new.password_hash,
            roles: vec![DEFAULT_ROLE.to_string()],
            passwordless_enabled: false,
            created_at,
        })
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_passwordless_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET passwordless_enabled = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRegistry for PgStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        device: &Device,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO user_devices (id, user_id, name, device_type, os, browser, user_agent, ip) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, id) DO UPDATE SET last_active = now()",
        )
        .bind(&device.id)
        .bind(user_id)
        .bind(&device.name)
        .bind(&device.device_type)
        .bind(&device.os)
        .bind(&device.browser)
        .bind(&device.user_agent)
        .bind(&device.ip)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, device_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(&device.id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn is_session_valid(
        &self,
        user_id: Uuid,
        device: &Device,
        raw_token: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, token_hash FROM refresh_tokens \
             WHERE user_id = $1 AND device_id = $2 \
               AND revoked = FALSE AND expires_at > now() \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(&device.id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, token_hash)) = row else {
            return Ok(false);
        };
        if !token_matches(&token_hash, raw_token) {
            return Ok(false);
        }

        sqlx::query("UPDATE refresh_tokens SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        debug!(%user_id, revoked = result.rows_affected(), "revoked all sessions");
        Ok(())
    }

    async fn revoke_session(&self, user_id: Uuid, device_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE user_id = $1 AND device_id = $2 AND revoked = FALSE",
        )
        .bind(user_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>, StoreError> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, device_type, os, browser, user_agent, ip, last_active \
             FROM user_devices WHERE user_id = $1 ORDER BY last_active DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn get_device(&self, user_id: Uuid, device_id: &str) -> Result<Device, StoreError> {
        sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, device_type, os, browser, user_agent, ip, last_active \
             FROM user_devices WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Device::from)
        .ok_or(StoreError::NotFound)
    }

    async fn update_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE user_devices SET name = $3 WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(device_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_device(&self, user_id: Uuid, device_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND device_id = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM user_devices WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(device_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl FederationStore for PgStore {
    async fn find_user_by_federated_id(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u \
             JOIN oauth2_connections c ON c.user_id = u.id \
             WHERE c.provider = $1 AND c.provider_id = $2"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(provider)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn link_identity(
        &self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError> {
        let access_token = self.cipher.seal(&identity.access_token)?;
        let refresh_token = self.cipher.seal_opt(identity.refresh_token.as_deref())?;
        let id_token = self.cipher.seal_opt(identity.id_token.as_deref())?;

        sqlx::query(
            "INSERT INTO oauth2_connections \
               (provider, provider_id, user_id, email, access_token, refresh_token, id_token, token_type, expiry) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (provider, provider_id) DO UPDATE SET \
               user_id = EXCLUDED.user_id, email = EXCLUDED.email, \
               access_token = EXCLUDED.access_token, refresh_token = EXCLUDED.refresh_token, \
               id_token = EXCLUDED.id_token, token_type = EXCLUDED.token_type, \
               expiry = EXCLUDED.expiry, updated_at = now()",
        )
        .bind(&identity.provider)
        .bind(&identity.provider_id)
        .bind(user_id)
        .bind(&identity.email)
        .bind(access_token)
        .bind(refresh_token)
        .bind(id_token)
        .bind(&identity.token_type)
        .bind(identity.expiry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PasskeyStore for PgStore {
    async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, user_id, credential::text AS credential, created_at, last_used_at \
             FROM webauthn_credentials WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WebAuthnCredential::from).collect())
    }

    async fn create_credential(&self, credential: &WebAuthnCredential) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webauthn_credentials (id, user_id, credential, created_at) \
             VALUES ($1, $2, $3::jsonb, $4)",
        )
        .bind(&credential.id)
        .bind(credential.user_id)
        .bind(&credential.credential)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("credential {} already registered", credential.id))
            } else {
                StoreError::Db(e)
            }
        })?;
        Ok(())
    }

    async fn update_credential(
        &self,
        user_id: Uuid,
        credential_id: &str,
        credential: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webauthn_credentials SET credential = $3::jsonb, last_used_at = now() \
             WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(credential_id)
        .bind(credential)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_credential(
        &self,
        user_id: Uuid,
        credential_id: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM webauthn_credentials WHERE user_id = $1 AND id = $2")
                .bind(user_id)
                .bind(credential_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
