//! WebAuthn registration and login ceremonies.
//!
//! A ceremony is two calls. `begin_*` returns the challenge for the client
//! and an opaque state string; the caller parks that state in the cache
//! under [`ceremony_key`] and hands it back, unchanged, to `finish_*`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CredentialID, Passkey, PasskeyAuthentication, PasskeyRegistration, PublicKeyCredential,
    RegisterPublicKeyCredential, Url, Webauthn, WebauthnBuilder,
};

use crate::config::WebAuthnConfig;
use crate::models::auth::User;
use crate::models::webauthn::{CeremonyKind, WebAuthnCredential};

#[derive(Debug, Error)]
pub enum CeremonyError {
    /// No parked state for this ceremony, or it has expired.
    #[error("Ceremony session not found")]
    SessionNotFound,

    /// The user has no registered credentials to log in with.
    #[error("No credentials registered")]
    NoCredentials,

    #[error("Malformed ceremony data: {0}")]
    Malformed(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Relying party misconfigured: {0}")]
    Config(String),
}

/// Cache key for parked ceremony state.
pub fn ceremony_key(kind: CeremonyKind, user_id: Uuid) -> String {
    format!("webauthn:{kind}:{user_id}")
}

/// Output of a `begin_*` call.
#[derive(Debug, Clone)]
pub struct Ceremony {
    /// Options passed to `navigator.credentials.create()` / `.get()`.
    pub challenge: serde_json::Value,
    /// Opaque verifier state, to be returned byte-for-byte to `finish_*`.
    pub state: String,
}

/// A successful login assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginAssertion {
    /// ID of the credential that signed the challenge.
    pub credential_id: String,
    /// Re-serialized credential when its counter or backup state moved.
    pub updated_credential: Option<String>,
}

/// Runs the verifier side of both ceremonies.
pub trait CeremonyManager: Send + Sync {
    fn begin_registration(
        &self,
        user: &User,
        existing: &[WebAuthnCredential],
    ) -> Result<Ceremony, CeremonyError>;

    fn finish_registration(
        &self,
        user_id: Uuid,
        state: &str,
        response: &[u8],
    ) -> Result<WebAuthnCredential, CeremonyError>;

    fn begin_login(&self, credentials: &[WebAuthnCredential]) -> Result<Ceremony, CeremonyError>;

    fn finish_login(
        &self,
        state: &str,
        credentials: &[WebAuthnCredential],
        response: &[u8],
    ) -> Result<LoginAssertion, CeremonyError>;
}

fn malformed(what: &str) -> impl Fn(serde_json::Error) -> CeremonyError + '_ {
    move |e| CeremonyError::Malformed(format!("{what}: {e}"))
}

fn verification(e: webauthn_rs::prelude::WebauthnError) -> CeremonyError {
    CeremonyError::Verification(format!("{e:?}"))
}

fn encode_cred_id(id: &CredentialID) -> String {
    URL_SAFE_NO_PAD.encode(id.as_slice())
}

fn decode_passkeys(credentials: &[WebAuthnCredential]) -> Result<Vec<Passkey>, CeremonyError> {
    credentials
        .iter()
        .map(|c| serde_json::from_str::<Passkey>(&c.credential).map_err(malformed("stored passkey")))
        .collect()
}

/// [`CeremonyManager`] backed by `webauthn-rs` passkeys.
pub struct PasskeyCeremonies {
    webauthn: Webauthn,
}

impl PasskeyCeremonies {
    pub fn new(config: &WebAuthnConfig) -> Result<Self, CeremonyError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| CeremonyError::Config(format!("origin {}: {e}", config.origin)))?;
        let mut builder = WebauthnBuilder::new(&config.rp_id, &origin)
            .map_err(|e| CeremonyError::Config(format!("{e:?}")))?
            .rp_name(&config.rp_name);
        for extra in &config.extra_origins {
            let url = Url::parse(extra)
                .map_err(|e| CeremonyError::Config(format!("origin {extra}: {e}")))?;
            builder = builder.append_allowed_origin(&url);
        }
        let webauthn = builder
            .build()
            .map_err(|e| CeremonyError::Config(format!("{e:?}")))?;
        Ok(Self { webauthn })
    }
}

impl CeremonyManager for PasskeyCeremonies {
    fn begin_registration(
        &self,
        user: &User,
        existing: &[WebAuthnCredential],
    ) -> Result<Ceremony, CeremonyError> {
        let exclude: Vec<CredentialID> = decode_passkeys(existing)?
            .iter()
            .map(|pk| pk.cred_id().clone())
            .collect();
        let display_name = if user.name.is_empty() {
            &user.email
        } else {
            &user.name
        };
        let (challenge, state) = self
            .webauthn
            .start_passkey_registration(
                user.id,
                &user.email,
                display_name,
                (!exclude.is_empty()).then_some(exclude),
            )
            .map_err(verification)?;
        Ok(Ceremony {
            challenge: serde_json::to_value(&challenge).map_err(malformed("challenge"))?,
            state: serde_json::to_string(&state).map_err(malformed("registration state"))?,
        })
    }

    fn finish_registration(
        &self,
        user_id: Uuid,
        state: &str,
        response: &[u8],
    ) -> Result<WebAuthnCredential, CeremonyError> {
        let state: PasskeyRegistration =
            serde_json::from_str(state).map_err(malformed("registration state"))?;
        let response: RegisterPublicKeyCredential =
            serde_json::from_slice(response).map_err(malformed("registration response"))?;
        let passkey = self
            .webauthn
            .finish_passkey_registration(&response, &state)
            .map_err(verification)?;
        Ok(WebAuthnCredential {
            id: encode_cred_id(passkey.cred_id()),
            user_id,
            credential: serde_json::to_string(&passkey).map_err(malformed("passkey"))?,
            created_at: Utc::now(),
            last_used_at: None,
        })
    }

    fn begin_login(&self, credentials: &[WebAuthnCredential]) -> Result<Ceremony, CeremonyError> {
        let passkeys = decode_passkeys(credentials)?;
        if passkeys.is_empty() {
            return Err(CeremonyError::NoCredentials);
        }
        let (challenge, state) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(verification)?;
        Ok(Ceremony {
            challenge: serde_json::to_value(&challenge).map_err(malformed("challenge"))?,
            state: serde_json::to_string(&state).map_err(malformed("authentication state"))?,
        })
    }

    fn finish_login(
        &self,
        state: &str,
        credentials: &[WebAuthnCredential],
        response: &[u8],
    ) -> Result<LoginAssertion, CeremonyError> {
        let state: PasskeyAuthentication =
            serde_json::from_str(state).map_err(malformed("authentication state"))?;
        let response: PublicKeyCredential =
            serde_json::from_slice(response).map_err(malformed("authentication response"))?;
        // Counter regressions (possible cloned authenticators) fail here.
        let result = self
            .webauthn
            .finish_passkey_authentication(&response, &state)
            .map_err(verification)?;

        let credential_id = encode_cred_id(result.cred_id());
        let stored = credentials
            .iter()
            .find(|c| c.id == credential_id)
            .ok_or_else(|| CeremonyError::Verification("credential not registered".into()))?;
        let mut passkey: Passkey =
            serde_json::from_str(&stored.credential).map_err(malformed("stored passkey"))?;

        let updated_credential = match passkey.update_credential(&result) {
            Some(true) => Some(serde_json::to_string(&passkey).map_err(malformed("passkey"))?),
            _ => None,
        };
        Ok(LoginAssertion {
            credential_id,
            updated_credential,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use openssl::bn::{BigNum, BigNumContext};
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::sha::sha256;
    use openssl::sign::Signer;
    use serde_cbor_2::Value;
    use serde_json::json;

    use super::*;

    fn config() -> WebAuthnConfig {
        WebAuthnConfig {
            rp_id: "sso.example.com".into(),
            rp_name: "SSO".into(),
            origin: "https://sso.example.com".into(),
            extra_origins: vec!["https://app.example.com".into()],
            ceremony_ttl: std::time::Duration::from_secs(300),
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            name: "Ada".into(),
            avatar: None,
            password_hash: None,
            roles: vec!["user".into()],
            passwordless_enabled: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn key_shape() {
        let id = Uuid::nil();
        assert_eq!(
            ceremony_key(CeremonyKind::Registration, id),
            "webauthn:registration:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            ceremony_key(CeremonyKind::Login, id),
            "webauthn:login:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn rejects_bad_origin() {
        let mut bad = config();
        bad.origin = "not a url".into();
        assert!(matches!(
            PasskeyCeremonies::new(&bad),
            Err(CeremonyError::Config(_))
        ));
    }

    #[test]
    fn begin_registration_yields_challenge_and_state() {
        let ceremonies = PasskeyCeremonies::new(&config()).unwrap();
        let u = user();
        let ceremony = ceremonies.begin_registration(&u, &[]).unwrap();
        assert_eq!(ceremony.challenge["publicKey"]["rp"]["id"], "sso.example.com");
        assert_eq!(ceremony.challenge["publicKey"]["user"]["name"], "ada@example.com");
        assert!(serde_json::from_str::<PasskeyRegistration>(&ceremony.state).is_ok());
    }

    #[test]
    fn each_registration_gets_a_fresh_challenge() {
        let ceremonies = PasskeyCeremonies::new(&config()).unwrap();
        let u = user();
        let a = ceremonies.begin_registration(&u, &[]).unwrap();
        let b = ceremonies.begin_registration(&u, &[]).unwrap();
        assert_ne!(
            a.challenge["publicKey"]["challenge"],
            b.challenge["publicKey"]["challenge"]
        );
    }

    #[test]
    fn begin_login_without_credentials_is_rejected() {
        let ceremonies = PasskeyCeremonies::new(&config()).unwrap();
        assert!(matches!(
            ceremonies.begin_login(&[]),
            Err(CeremonyError::NoCredentials)
        ));
    }

    #[test]
    fn finish_with_garbage_is_malformed() {
        let ceremonies = PasskeyCeremonies::new(&config()).unwrap();
        let u = user();
        let ceremony = ceremonies.begin_registration(&u, &[]).unwrap();
        assert!(matches!(
            ceremonies.finish_registration(u.id, &ceremony.state, b"{}"),
            Err(CeremonyError::Malformed(_))
        ));
        assert!(matches!(
            ceremonies.finish_registration(u.id, "not-state", b"{}"),
            Err(CeremonyError::Malformed(_))
        ));
        assert!(matches!(
            ceremonies.finish_login("not-state", &[], b"{}"),
            Err(CeremonyError::Malformed(_))
        ));
    }

    /// Software P-256 authenticator producing "none" attestations.
    struct SoftKey {
        key: PKey<Private>,
        x: Vec<u8>,
        y: Vec<u8>,
        cred_id: Vec<u8>,
        counter: u32,
    }

    impl SoftKey {
        fn new() -> Self {
            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
            let ec = EcKey::generate(&group).unwrap();
            let mut ctx = BigNumContext::new().unwrap();
            let (mut x, mut y) = (BigNum::new().unwrap(), BigNum::new().unwrap());
            ec.public_key()
                .affine_coordinates_gfp(&group, &mut x, &mut y, &mut ctx)
                .unwrap();
            Self {
                x: x.to_vec_padded(32).unwrap(),
                y: y.to_vec_padded(32).unwrap(),
                key: PKey::from_ec_key(ec).unwrap(),
                cred_id: Uuid::new_v4().as_bytes().to_vec(),
                counter: 0,
            }
        }

        fn client_data(kind: &str, challenge: &serde_json::Value) -> Vec<u8> {
            serde_json::to_vec(&json!({
                "type": kind,
                "challenge": challenge["publicKey"]["challenge"],
                "origin": "https://sso.example.com",
            }))
            .unwrap()
        }

        fn auth_data(&self, flags: u8) -> Vec<u8> {
            let mut data = sha256(b"sso.example.com").to_vec();
            data.push(flags);
            data.extend_from_slice(&self.counter.to_be_bytes());
            data
        }

        fn cose_key(&self) -> Vec<u8> {
            let key = BTreeMap::from([
                (Value::Integer(1), Value::Integer(2)),
                (Value::Integer(3), Value::Integer(-7)),
                (Value::Integer(-1), Value::Integer(1)),
                (Value::Integer(-2), Value::Bytes(self.x.clone())),
                (Value::Integer(-3), Value::Bytes(self.y.clone())),
            ]);
            serde_cbor_2::to_vec(&Value::Map(key)).unwrap()
        }

        /// Answers `navigator.credentials.create()`.
        fn attest(&self, challenge: &serde_json::Value) -> Vec<u8> {
            // User present, user verified, attested credential data.
            let mut auth_data = self.auth_data(0x45);
            auth_data.extend_from_slice(&[0u8; 16]);
            auth_data.extend_from_slice(&(self.cred_id.len() as u16).to_be_bytes());
            auth_data.extend_from_slice(&self.cred_id);
            auth_data.extend_from_slice(&self.cose_key());
            let object = BTreeMap::from([
                (Value::Text("fmt".into()), Value::Text("none".into())),
                (Value::Text("attStmt".into()), Value::Map(BTreeMap::new())),
                (Value::Text("authData".into()), Value::Bytes(auth_data)),
            ]);
            let id = URL_SAFE_NO_PAD.encode(&self.cred_id);
            serde_json::to_vec(&json!({
                "id": id,
                "rawId": id,
                "type": "public-key",
                "response": {
                    "attestationObject":
                        URL_SAFE_NO_PAD.encode(serde_cbor_2::to_vec(&Value::Map(object)).unwrap()),
                    "clientDataJSON":
                        URL_SAFE_NO_PAD.encode(Self::client_data("webauthn.create", challenge)),
                },
            }))
            .unwrap()
        }

        /// Answers `navigator.credentials.get()`, bumping the signature counter.
        fn assert(&mut self, challenge: &serde_json::Value) -> Vec<u8> {
            self.counter += 1;
            let auth_data = self.auth_data(0x05);
            let client_data = Self::client_data("webauthn.get", challenge);
            let mut signer = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
            signer.update(&auth_data).unwrap();
            signer.update(&sha256(&client_data)).unwrap();
            let signature = signer.sign_to_vec().unwrap();
            let id = URL_SAFE_NO_PAD.encode(&self.cred_id);
            serde_json::to_vec(&json!({
                "id": id,
                "rawId": id,
                "type": "public-key",
                "response": {
                    "authenticatorData": URL_SAFE_NO_PAD.encode(auth_data),
                    "clientDataJSON": URL_SAFE_NO_PAD.encode(client_data),
                    "signature": URL_SAFE_NO_PAD.encode(signature),
                    "userHandle": null,
                },
            }))
            .unwrap()
        }
    }

    #[test]
    fn passkey_registers_then_signs_in() {
        let ceremonies = PasskeyCeremonies::new(&config()).unwrap();
        let u = user();
        let mut key = SoftKey::new();

        let reg = ceremonies.begin_registration(&u, &[]).unwrap();
        let credential = ceremonies
            .finish_registration(u.id, &reg.state, &key.attest(&reg.challenge))
            .unwrap();
        assert_eq!(credential.id, URL_SAFE_NO_PAD.encode(&key.cred_id));
        assert_eq!(credential.user_id, u.id);
        let stored: serde_json::Value = serde_json::from_str(&credential.credential).unwrap();
        assert_eq!(stored["cred"]["counter"], 0);

        let login = ceremonies.begin_login(std::slice::from_ref(&credential)).unwrap();
        let assertion = ceremonies
            .finish_login(
                &login.state,
                std::slice::from_ref(&credential),
                &key.assert(&login.challenge),
            )
            .unwrap();
        assert_eq!(assertion.credential_id, credential.id);
        let updated: serde_json::Value =
            serde_json::from_str(assertion.updated_credential.as_deref().unwrap()).unwrap();
        assert_eq!(updated["cred"]["counter"], 1);
    }

    #[test]
    fn assertion_for_another_challenge_is_rejected() {
        let ceremonies = PasskeyCeremonies::new(&config()).unwrap();
        let u = user();
        let mut key = SoftKey::new();
        let reg = ceremonies.begin_registration(&u, &[]).unwrap();
        let credential = ceremonies
            .finish_registration(u.id, &reg.state, &key.attest(&reg.challenge))
            .unwrap();
        let creds = std::slice::from_ref(&credential);

        let first = ceremonies.begin_login(creds).unwrap();
        let second = ceremonies.begin_login(creds).unwrap();
        assert!(matches!(
            ceremonies.finish_login(&second.state, creds, &key.assert(&first.challenge)),
            Err(CeremonyError::Verification(_))
        ));
    }

    #[test]
    fn attestation_for_another_relying_party_is_rejected() {
        let mut other = config();
        other.rp_id = "example.com".into();
        other.origin = "https://example.com".into();
        other.extra_origins.clear();
        let ceremonies = PasskeyCeremonies::new(&other).unwrap();
        let u = user();
        let reg = ceremonies.begin_registration(&u, &[]).unwrap();
        assert!(matches!(
            ceremonies.finish_registration(u.id, &reg.state, &SoftKey::new().attest(&reg.challenge)),
            Err(CeremonyError::Verification(_))
        ));
    }
}
