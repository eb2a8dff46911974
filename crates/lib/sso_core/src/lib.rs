//! # sso_core
//!
//! Identity and session core of the SSO service: password credentials,
//! bearer tokens, device-bound refresh sessions, identity federation and
//! WebAuthn ceremonies, composed by the [`orchestrator::Authenticator`].

pub mod auth;
pub mod cache;
pub mod config;
pub mod email;
pub mod federation;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod secrets;
pub mod store;
pub mod webauthn;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
