//! Stateless signed state for redirect-based flows.
//!
//! `state = base64url(nonce "|" unix_ts) "." base64url(HMAC-SHA256(secret, data))`
//!
//! Nothing is stored server-side: the callback accepts a state when its
//! signature verifies and it is no older than the allowed age.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use super::FederationError;

type HmacSha256 = Hmac<Sha256>;

/// Generates and validates anti-CSRF state values.
pub trait StateSigner: Send + Sync {
    fn generate(&self) -> Result<String, FederationError>;

    fn validate(&self, state: &str, max_age: Duration) -> Result<(), FederationError>;
}

/// HMAC-SHA256 state signer.
#[derive(Clone)]
pub struct HmacStateSigner {
    secret: Vec<u8>,
}

impl HmacStateSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, FederationError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| FederationError::Config(format!("state secret: {e}")))
    }

    /// Generate a state stamped with `now`.
    pub fn generate_at(&self, now: DateTime<Utc>) -> Result<String, FederationError> {
        let data = format!("{}|{}", Uuid::new_v4(), now.timestamp());
        let mut mac = self.mac()?;
        mac.update(data.as_bytes());
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE.encode(data.as_bytes()),
            URL_SAFE.encode(signature)
        ))
    }

    /// Validate `state` as of `now`.
    pub fn validate_at(
        &self,
        state: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), FederationError> {
        let parts: Vec<&str> = state.split('.').collect();
        let [data_b64, sig_b64] = parts.as_slice() else {
            return Err(FederationError::InvalidStateFormat);
        };

        let data = URL_SAFE
            .decode(data_b64)
            .map_err(|_| FederationError::InvalidStateFormat)?;
        let signature = URL_SAFE
            .decode(sig_b64)
            .map_err(|_| FederationError::InvalidSignature)?;

        let mut mac = self.mac()?;
        mac.update(&data);
        // Constant-time comparison.
        mac.verify_slice(&signature)
            .map_err(|_| FederationError::InvalidSignature)?;

        let data = std::str::from_utf8(&data).map_err(|_| FederationError::InvalidDataFormat)?;
        let fields: Vec<&str> = data.split('|').collect();
        let [_nonce, timestamp] = fields.as_slice() else {
            return Err(FederationError::InvalidDataFormat);
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| FederationError::InvalidDataFormat)?;

        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if now.timestamp().saturating_sub(timestamp) > max_age {
            return Err(FederationError::StateExpired);
        }
        Ok(())
    }
}

impl StateSigner for HmacStateSigner {
    fn generate(&self) -> Result<String, FederationError> {
        self.generate_at(Utc::now())
    }

    fn validate(&self, state: &str, max_age: Duration) -> Result<(), FederationError> {
        self.validate_at(state, max_age, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HmacStateSigner {
        HmacStateSigner::new("state-secret")
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    #[test]
    fn fresh_state_validates_for_any_max_age() {
        let now = at(1_700_000_000);
        let state = signer().generate_at(now).unwrap();
        for secs in [0, 1, 300, u64::MAX] {
            assert!(
                signer()
                    .validate_at(&state, Duration::from_secs(secs), now)
                    .is_ok(),
                "max_age {secs}"
            );
        }
        assert!(signer().validate(&signer().generate().unwrap(), Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn state_is_url_safe_ascii() {
        let state = signer().generate().unwrap();
        assert!(state.is_ascii());
        assert!(
            state
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_=.".contains(c))
        );
        assert_eq!(state.matches('.').count(), 1);
    }

    #[test]
    fn state_expires_after_max_age() {
        let issued = at(1_700_000_000);
        let state = signer().generate_at(issued).unwrap();
        let max_age = Duration::from_secs(300);
        assert!(signer().validate_at(&state, max_age, at(1_700_000_300)).is_ok());
        assert!(matches!(
            signer().validate_at(&state, max_age, at(1_700_000_301)),
            Err(FederationError::StateExpired)
        ));
    }

    #[test]
    fn every_signature_bit_flip_is_rejected() {
        let now = at(1_700_000_000);
        let state = signer().generate_at(now).unwrap();
        let (data_b64, sig_b64) = state.split_once('.').unwrap();
        let sig = URL_SAFE.decode(sig_b64).unwrap();
        for byte in 0..sig.len() {
            for bit in 0..8 {
                let mut flipped = sig.clone();
                flipped[byte] ^= 1 << bit;
                let tampered = format!("{data_b64}.{}", URL_SAFE.encode(&flipped));
                assert!(matches!(
                    signer().validate_at(&tampered, Duration::from_secs(300), now),
                    Err(FederationError::InvalidSignature)
                ));
            }
        }
    }

    #[test]
    fn different_secret_is_rejected() {
        let state = HmacStateSigner::new("other-secret").generate().unwrap();
        assert!(matches!(
            signer().validate(&state, Duration::from_secs(300)),
            Err(FederationError::InvalidSignature)
        ));
    }

    #[test]
    fn tampered_data_is_rejected() {
        let now = at(1_700_000_000);
        let state = signer().generate_at(now).unwrap();
        let (_, sig_b64) = state.split_once('.').unwrap();
        let forged = URL_SAFE.encode(format!("{}|{}", Uuid::new_v4(), now.timestamp()));
        assert!(matches!(
            signer().validate_at(&format!("{forged}.{sig_b64}"), Duration::from_secs(300), now),
            Err(FederationError::InvalidSignature)
        ));
    }

    #[test]
    fn structural_errors() {
        let d = Duration::from_secs(300);
        assert!(matches!(
            signer().validate("no-dot-here", d),
            Err(FederationError::InvalidStateFormat)
        ));
        assert!(matches!(
            signer().validate("a.b.c", d),
            Err(FederationError::InvalidStateFormat)
        ));
        assert!(matches!(
            signer().validate("!!!.AAAA", d),
            Err(FederationError::InvalidStateFormat)
        ));
    }

    #[test]
    fn signed_data_without_separator_is_a_data_format_error() {
        let data = "no-separator";
        let mut mac = signer().mac().unwrap();
        mac.update(data.as_bytes());
        let state = format!(
            "{}.{}",
            URL_SAFE.encode(data),
            URL_SAFE.encode(mac.finalize().into_bytes())
        );
        assert!(matches!(
            signer().validate(&state, Duration::from_secs(300)),
            Err(FederationError::InvalidDataFormat)
        ));
    }

    #[test]
    fn signed_data_with_bad_timestamp_is_a_data_format_error() {
        let data = "nonce|yesterday";
        let mut mac = signer().mac().unwrap();
        mac.update(data.as_bytes());
        let state = format!(
            "{}.{}",
            URL_SAFE.encode(data),
            URL_SAFE.encode(mac.finalize().into_bytes())
        );
        assert!(matches!(
            signer().validate(&state, Duration::from_secs(300)),
            Err(FederationError::InvalidDataFormat)
        ));
    }
}
