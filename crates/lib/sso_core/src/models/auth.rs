//! Account and bearer-token models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    /// bcrypt hash; `None` for accounts created through federation only.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub roles: Vec<String>,
    /// Whether a WebAuthn credential has been registered.
    pub passwordless_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a local account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub password_hash: Option<String>,
}

/// Claims embedded in access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user ID.
    pub sub: Uuid,
    pub roles: Vec<String>,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    pub iss: String,
    /// Unique token ID, so two tokens minted in the same second differ.
    pub jti: Uuid,
}

/// An access/refresh token pair handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}
