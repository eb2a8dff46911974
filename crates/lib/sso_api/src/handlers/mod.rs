//! Request handlers.

pub mod auth;
pub mod codes;
pub mod devices;
pub mod federation;
pub mod passkeys;
