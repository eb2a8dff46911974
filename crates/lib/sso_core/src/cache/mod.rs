//! Key/value cache collaborator.
//!
//! Holds one-time codes, parked WebAuthn ceremony state and read-through
//! copies of non-sensitive data. The cache is never a source of truth.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is absent or expired.
    #[error("Cache miss")]
    NotFound,

    #[error("Cache value could not be decoded: {0}")]
    Decode(String),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// String-valued cache with per-entry TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fails with [`CacheError::NotFound`] when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<String, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Read and remove `key` in one step. Of several concurrent callers at
    /// most one gets the value; the rest see [`CacheError::NotFound`].
    async fn take(&self, key: &str) -> Result<String, CacheError>;

    /// Increment the counter at `key`, creating it with `ttl` when absent.
    /// Returns the new value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CacheError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob pattern (`*` matches any run of characters).
    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), CacheError>;
}

/// Typed helpers over [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<T, CacheError> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).map_err(|e| CacheError::Decode(e.to_string()))
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|e| CacheError::Decode(e.to_string()))?;
        self.set(key, raw, ttl).await
    }

    async fn get_code(&self, key: &str) -> Result<u32, CacheError> {
        parse_code(&self.get(key).await?)
    }

    /// Atomically read and remove a numeric code.
    async fn take_code(&self, key: &str) -> Result<u32, CacheError> {
        parse_code(&self.take(key).await?)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

fn parse_code(raw: &str) -> Result<u32, CacheError> {
    raw.trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| CacheError::Decode(e.to_string()))
}

/// Glob match supporting `*` only.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No `*` in the pattern: exact match.
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
