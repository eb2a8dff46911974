//! Outbound notification collaborator.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Sends one-time codes to users.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_login_code(&self, to: &str, code: u32) -> Result<(), MailError>;

    async fn send_password_reset(&self, to: &str, user_id: Uuid, code: u32)
    -> Result<(), MailError>;
}

/// Writes a delivery record to the log instead of sending mail. The code
/// itself is never logged.
#[derive(Debug, Default, Clone)]
pub struct LogMailer {
    service_name: String,
}

impl LogMailer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_login_code(&self, to: &str, _code: u32) -> Result<(), MailError> {
        info!(service = %self.service_name, %to, "login code issued");
        Ok(())
    }

    async fn send_password_reset(
        &self,
        to: &str,
        user_id: Uuid,
        _code: u32,
    ) -> Result<(), MailError> {
        info!(service = %self.service_name, %to, %user_id, "password reset code issued");
        Ok(())
    }
}
