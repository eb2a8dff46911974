//! OpenID Connect providers: discovery, code exchange and identity-token
//! verification against the provider's published keys.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use super::oauth2::{build_authorization_url, exchange_code, expiry_from};
use super::{FederationError, Flow, IdentityProvider};
use crate::config::ProviderCredentials;
use crate::models::federation::FederatedIdentity;

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// The subset of the discovery document this provider uses.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// An OIDC provider. Discovery runs lazily on first use and is cached;
/// signing keys are cached and refetched when an unknown key ID appears.
pub struct OidcProvider {
    name: String,
    issuer: String,
    client: reqwest::Client,
    creds: ProviderCredentials,
    discovery: OnceCell<Discovery>,
    jwks: RwLock<Option<JwkSet>>,
}

impl OidcProvider {
    pub fn new(
        name: impl Into<String>,
        issuer: impl Into<String>,
        client: reqwest::Client,
        creds: ProviderCredentials,
    ) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            client,
            creds,
            discovery: OnceCell::new(),
            jwks: RwLock::new(None),
        }
    }

    pub fn google(client: reqwest::Client, creds: ProviderCredentials) -> Self {
        Self::new("google", GOOGLE_ISSUER, client, creds)
    }

    fn scopes(&self) -> Vec<String> {
        if self.creds.scopes.is_empty() {
            vec!["openid".into(), "email".into(), "profile".into()]
        } else {
            self.creds.scopes.clone()
        }
    }

    async fn discovery(&self) -> Result<&Discovery, FederationError> {
        self.discovery
            .get_or_try_init(|| async {
                let url = format!(
                    "{}/.well-known/openid-configuration",
                    self.issuer.trim_end_matches('/')
                );
                let doc: Discovery = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| FederationError::Discovery(format!("{url}: {e}")))?
                    .error_for_status()
                    .map_err(|e| FederationError::Discovery(format!("{url}: {e}")))?
                    .json()
                    .await
                    .map_err(|e| FederationError::Discovery(format!("{url}: {e}")))?;
                if doc.issuer.trim_end_matches('/') != self.issuer.trim_end_matches('/') {
                    return Err(FederationError::Discovery(format!(
                        "issuer mismatch: expected {}, got {}",
                        self.issuer, doc.issuer
                    )));
                }
                info!(provider = %self.name, issuer = %doc.issuer, "loaded OIDC discovery document");
                Ok(doc)
            })
            .await
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet, FederationError> {
        self.client
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| FederationError::IdToken(format!("jwks fetch: {e}")))?
            .error_for_status()
            .map_err(|e| FederationError::IdToken(format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| FederationError::IdToken(format!("jwks decode: {e}")))
    }

    /// Resolve the decoding key for `kid`, refreshing the key set once if it
    /// is not known.
    async fn decoding_key(&self, kid: &str, jwks_uri: &str) -> Result<DecodingKey, FederationError> {
        if let Some(set) = self.jwks.read().await.as_ref()
            && let Some(jwk) = set.find(kid)
        {
            return DecodingKey::from_jwk(jwk)
                .map_err(|e| FederationError::IdToken(format!("jwk: {e}")));
        }

        let set = self.fetch_jwks(jwks_uri).await?;
        let key = set
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| FederationError::IdToken(format!("jwk: {e}")))?;
        *self.jwks.write().await = Some(set);
        key.ok_or_else(|| FederationError::IdToken(format!("unknown key id {kid}")))
    }

    /// Verify an identity token's signature, issuer, audience and expiry.
    async fn verify_id_token(
        &self,
        id_token: &str,
        discovery: &Discovery,
    ) -> Result<IdTokenClaims, FederationError> {
        let header = decode_header(id_token)
            .map_err(|e| FederationError::IdToken(format!("header: {e}")))?;
        if !matches!(
            header.alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
                | Algorithm::ES256
                | Algorithm::ES384
                | Algorithm::EdDSA
        ) {
            return Err(FederationError::IdToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| FederationError::IdToken("missing key id".into()))?;
        let key = self.decoding_key(&kid, &discovery.jwks_uri).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.creds.client_id]);
        validation.set_issuer(&[&discovery.issuer]);

        decode::<IdTokenClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| FederationError::IdToken(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn flow(&self) -> Flow {
        Flow::Oidc
    }

    async fn authorization_url(&self, state: &str) -> Result<String, FederationError> {
        let discovery = self.discovery().await?;
        build_authorization_url(
            &discovery.authorization_endpoint,
            &self.creds,
            &self.scopes(),
            state,
        )
    }

    async fn exchange(&self, code: &str) -> Result<FederatedIdentity, FederationError> {
        let discovery = self.discovery().await?;
        let token = exchange_code(&self.client, &discovery.token_endpoint, &self.creds, code).await?;
        let id_token = token
            .id_token
            .ok_or_else(|| FederationError::IdToken("token response has no id_token".into()))?;
        let claims = self.verify_id_token(&id_token, discovery).await?;

        let email = claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| FederationError::IdToken("id_token has no email claim".into()))?;
        debug!(provider = %self.name, sub = %claims.sub, "verified identity token");

        Ok(FederatedIdentity {
            provider: self.name.clone(),
            provider_id: claims.sub,
            name: claims.name.unwrap_or_default(),
            email,
            picture: claims.picture,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: Some(id_token),
            token_type: token.token_type.unwrap_or_else(|| "Bearer".into()),
            expiry: expiry_from(token.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::collections::HashMap;

    const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/oidc_rsa_key.pem");
    const TEST_KEY_N: &str = "sHefqN7RBhVTSami-iqoIROARByTVN29zaTgoENv74t0gk6Rh1F5guBAtbF9ZNSt4-WMdE1cVzYRZOsZhOdJwGVR8v2-VyUz5qfgBrJd7hrWQC0QqOaGdmZb9XRgbbtPG1QycumrmANCWRnTPh2v3QYz7esr8L3DxLBZz2TeL-yjGvvyww9sFaQ4h8WgqajDjHQuoSDsaoJ36II6RJQQKuXiWJtN-dDb7MwKXTJpskiHbDTa7Z1P8SefGbv0x7PDVjl5CNEKhRZB55HFnzwx320UINmJcvifuUgWNS9_LifuONVOYNaniodLg3VNFRKldqcqSDRviPy5qRO7sO0TTw";
    const CLIENT_ID: &str = "oidc-client";

    #[derive(Clone)]
    struct Idp {
        issuer: String,
        audience: String,
    }

    fn sign(claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-key".into());
        encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    async fn discovery(State(idp): State<Idp>) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "issuer": idp.issuer,
            "authorization_endpoint": format!("{}/authorize", idp.issuer),
            "token_endpoint": format!("{}/token", idp.issuer),
            "jwks_uri": format!("{}/jwks", idp.issuer),
        }))
    }

    async fn jwks() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": "test-key",
                "alg": "RS256",
                "use": "sig",
                "n": TEST_KEY_N,
                "e": "AQAB"
            }]
        }))
    }

    async fn token(
        State(idp): State<Idp>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        let now = Utc::now().timestamp();
        let id_token = sign(serde_json::json!({
            "iss": idp.issuer,
            "aud": idp.audience,
            "sub": "oidc-sub-1",
            "email": "grace@example.com",
            "name": "Grace",
            "iat": now,
            "exp": now + 600,
        }));
        let (access, expires_in) = match form.get("code").map(String::as_str) {
            Some("good-code") => ("idp-access", 600),
            Some("forever-code") => ("idp-access", i64::MAX),
            _ => ("", 600),
        };
        Json(serde_json::json!({
            "access_token": access,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "id_token": id_token,
        }))
    }

    /// Starts a fake IdP. `audience` is what it puts in issued identity tokens.
    async fn idp(audience: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let issuer = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/jwks", get(jwks))
            .route("/token", post(token))
            .with_state(Idp {
                issuer: issuer.clone(),
                audience: audience.to_string(),
            });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        issuer
    }

    fn provider(issuer: &str) -> OidcProvider {
        OidcProvider::new(
            "google",
            issuer,
            reqwest::Client::new(),
            ProviderCredentials {
                client_id: CLIENT_ID.into(),
                client_secret: "secret".into(),
                redirect_url: "https://sso.example.com/auth/oidc/google/callback".into(),
                scopes: vec![],
            },
        )
    }

    #[tokio::test]
    async fn authorization_url_uses_discovered_endpoint() {
        let issuer = idp(CLIENT_ID).await;
        let url = provider(&issuer).authorization_url("st").await.unwrap();
        assert!(url.starts_with(&format!("{issuer}/authorize?")));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=st"));
    }

    #[tokio::test]
    async fn exchange_verifies_identity_token() {
        let issuer = idp(CLIENT_ID).await;
        let identity = provider(&issuer).exchange("good-code").await.unwrap();
        assert_eq!(identity.provider, "google");
        assert_eq!(identity.provider_id, "oidc-sub-1");
        assert_eq!(identity.email, "grace@example.com");
        assert_eq!(identity.name, "Grace");
        assert_eq!(identity.access_token, "idp-access");
        assert!(identity.id_token.is_some());
        assert!(identity.expiry.is_some());
    }

    #[tokio::test]
    async fn unrepresentable_lifetime_means_no_expiry() {
        let issuer = idp(CLIENT_ID).await;
        let identity = provider(&issuer).exchange("forever-code").await.unwrap();
        assert_eq!(identity.email, "grace@example.com");
        assert!(identity.expiry.is_none());
    }

    #[tokio::test]
    async fn exchange_rejects_foreign_audience() {
        let issuer = idp("someone-elses-client").await;
        let err = provider(&issuer).exchange("good-code").await.unwrap_err();
        assert!(matches!(err, FederationError::IdToken(_)));
    }

    #[tokio::test]
    async fn exchange_rejects_failed_code() {
        let issuer = idp(CLIENT_ID).await;
        let err = provider(&issuer).exchange("bad-code").await.unwrap_err();
        assert!(matches!(err, FederationError::Exchange(_)));
    }

    #[tokio::test]
    async fn discovery_issuer_mismatch_is_rejected() {
        let issuer = idp(CLIENT_ID).await;
        let mut p = provider(&issuer);
        p.issuer = format!("{issuer}/other");
        let err = p.authorization_url("st").await.unwrap_err();
        assert!(matches!(err, FederationError::Discovery(_)));
    }
}
