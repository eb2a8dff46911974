//! Access and refresh token minting and verification (HS256).

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use uuid::Uuid;

use super::AuthError;
use crate::config::JwtConfig;
use crate::models::auth::{AccessClaims, TokenPair};

/// The only algorithm ever accepted.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Mints and verifies bearer tokens.
pub trait TokenIssuer: Send + Sync {
    fn access_ttl(&self) -> Duration;

    fn refresh_ttl(&self) -> Duration;

    /// Mint a token for `uid` valid for `ttl`.
    fn mint(&self, uid: Uuid, roles: &[String], ttl: Duration) -> Result<String, AuthError>;

    /// Verify a token and return its claims.
    fn parse(&self, token: &str) -> Result<AccessClaims, AuthError>;

    /// Mint an access token and a refresh token at the two policy TTLs.
    fn mint_pair(&self, uid: Uuid, roles: &[String]) -> Result<TokenPair, AuthError> {
        let access = self.mint(uid, roles, self.access_ttl())?;
        let refresh = self.mint(uid, roles, self.refresh_ttl())?;
        Ok(TokenPair { access, refresh })
    }
}

/// HS256 token issuer bound to one secret and issuer name.
#[derive(Clone)]
pub struct JwtIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtIssuer {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation
    }
}

impl TokenIssuer for JwtIssuer {
    fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn mint(&self, uid: Uuid, roles: &[String], ttl: Duration) -> Result<String, AuthError> {
        let iat = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| AuthError::TokenCreationFailure("ttl out of range".into()))?;
        let claims = AccessClaims {
            sub: uid,
            roles: roles.to_vec(),
            iat,
            exp: iat + ttl_secs,
            iss: self.issuer.clone(),
            jti: Uuid::new_v4(),
        };
        encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenCreationFailure(format!("jwt encode: {e}")))
    }

    fn parse(&self, token: &str) -> Result<AccessClaims, AuthError> {
        // The header algorithm is checked before any signature work.
        let header = decode_header(token).map_err(|_| AuthError::InvalidToken)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(AuthError::UnexpectedSigningMethod);
        }
        decode::<AccessClaims>(token, &self.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}
