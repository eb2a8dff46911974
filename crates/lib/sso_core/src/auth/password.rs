//! Password hashing via bcrypt.

use super::AuthError;

/// One-way password hashing with constant-time verification.
pub trait PasswordHasher: Send + Sync {
    /// Hash a password. Fails only on internal RNG or algorithm error.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Verify a password against a stored hash.
    ///
    /// A mismatch and an unparseable hash both yield
    /// [`AuthError::InvalidCredentials`].
    fn verify(&self, hash: &str, password: &str) -> Result<(), AuthError>;
}

/// bcrypt with a configurable cost.
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(crate::config::BCRYPT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::HashingFailure(format!("bcrypt hash: {e}")))
    }

    fn verify(&self, hash: &str, password: &str) -> Result<(), AuthError> {
        match bcrypt::verify(password, hash) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(AuthError::InvalidCredentials),
        }
    }
}
