//! Device and refresh-session models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client fingerprint derived from the user agent and remote address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable hash of IP and user agent.
    pub id: String,
    pub name: String,
    pub device_type: String,
    pub os: String,
    pub browser: String,
    pub user_agent: String,
    pub ip: String,
    pub last_active: Option<DateTime<Utc>>,
}

/// A device-bound refresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: i64,
    pub user_id: Uuid,
    /// SHA-256 hex digest of the refresh token.
    pub token_hash: String,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Whether this session can still be exchanged at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}
