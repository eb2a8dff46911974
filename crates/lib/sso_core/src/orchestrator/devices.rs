//! Device management for signed-in users.

use tracing::{info, warn};
use uuid::Uuid;

use super::Authenticator;
use crate::auth::AuthError;
use crate::cache::CacheExt;
use crate::models::session::Device;

fn devices_key(user_id: Uuid) -> String {
    format!("devices:{user_id}")
}

pub(super) fn devices_pattern(user_id: Uuid) -> String {
    format!("{}*", devices_key(user_id))
}

impl Authenticator {
    /// Devices holding a session for `user_id`, through the read cache.
    pub async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>, AuthError> {
        let key = devices_key(user_id);
        if let Ok(Ok(devices)) =
            tokio::time::timeout(self.config.io_timeout, self.cache.get_json::<Vec<Device>>(&key))
                .await
        {
            return Ok(devices);
        }

        let devices = self.deadline(self.sessions.list_devices(user_id)).await?;
        if let Err(e) = self
            .deadline(self.cache.set_json(&key, &devices, self.config.read_cache_ttl))
            .await
        {
            warn!(%user_id, error = %e, "device cache fill failed");
        }
        Ok(devices)
    }

    pub async fn get_device(&self, user_id: Uuid, device_id: &str) -> Result<Device, AuthError> {
        self.deadline(self.sessions.get_device(user_id, device_id)).await
    }

    pub async fn rename_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        name: &str,
    ) -> Result<(), AuthError> {
        self.deadline(self.sessions.update_device(user_id, device_id, name))
            .await?;
        self.forget_pattern(&devices_pattern(user_id));
        Ok(())
    }

    /// Forget a device. Its sessions are revoked, so its refresh tokens stop
    /// working immediately.
    pub async fn delete_device(&self, user_id: Uuid, device_id: &str) -> Result<(), AuthError> {
        self.deadline(self.sessions.delete_device(user_id, device_id))
            .await?;
        self.forget_pattern(&devices_pattern(user_id));
        info!(%user_id, device_id, "device deleted");
        Ok(())
    }
}
