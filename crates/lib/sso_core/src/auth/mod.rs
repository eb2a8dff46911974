//! Authentication primitives and the error taxonomy of the orchestrator boundary.
//!
//! Provides password hashing, token minting and verification, device
//! fingerprinting and captcha verification.

pub mod captcha;
pub mod device;
pub mod jwt;
pub mod password;

use thiserror::Error;

use crate::cache::CacheError;
use crate::federation::FederationError;
use crate::store::StoreError;
use crate::webauthn::CeremonyError;

/// Errors surfaced by the orchestrator and the services it composes.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unexpected signing method")]
    UnexpectedSigningMethod,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid state format")]
    InvalidStateFormat,

    #[error("Invalid state signature")]
    InvalidSignature,

    #[error("Invalid state data format")]
    InvalidDataFormat,

    #[error("State expired")]
    StateExpired,

    #[error("Code is not valid")]
    CodeNotValid,

    #[error("Not found")]
    NotFound,

    #[error("Captcha rejected")]
    CaptchaRejected,

    #[error("Hashing failure: {0}")]
    HashingFailure(String),

    #[error("Token creation failure: {0}")]
    TokenCreationFailure(String),

    #[error("Identity provider error: {0}")]
    Federation(String),

    #[error("WebAuthn ceremony failed: {0}")]
    Ceremony(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::NotFound,
            other => AuthError::Storage(other.to_string()),
        }
    }
}

impl From<CacheError> for AuthError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::NotFound => AuthError::NotFound,
            other => AuthError::Storage(other.to_string()),
        }
    }
}

impl From<FederationError> for AuthError {
    fn from(e: FederationError) -> Self {
        match e {
            FederationError::UnknownProvider(name) => AuthError::UnknownProvider(name),
            FederationError::InvalidStateFormat => AuthError::InvalidStateFormat,
            FederationError::InvalidSignature => AuthError::InvalidSignature,
            FederationError::InvalidDataFormat => AuthError::InvalidDataFormat,
            FederationError::StateExpired => AuthError::StateExpired,
            other => AuthError::Federation(other.to_string()),
        }
    }
}

impl From<CeremonyError> for AuthError {
    fn from(e: CeremonyError) -> Self {
        match e {
            CeremonyError::SessionNotFound => AuthError::NotFound,
            CeremonyError::NoCredentials => AuthError::NotFound,
            other => AuthError::Ceremony(other.to_string()),
        }
    }
}
