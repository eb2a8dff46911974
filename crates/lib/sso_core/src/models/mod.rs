//! Domain models shared by the stores, services and orchestrator.

pub mod auth;
pub mod federation;
pub mod session;
pub mod webauthn;
