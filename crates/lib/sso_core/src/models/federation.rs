//! Federated identity models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The external account returned by a provider after a code exchange,
/// together with the provider tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    /// Registry name of the provider (e.g. `google`).
    pub provider: String,
    /// The account ID at the provider.
    pub provider_id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: String,
    pub expiry: Option<DateTime<Utc>>,
}
