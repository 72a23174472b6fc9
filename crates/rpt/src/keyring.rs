//! Keyring of known issuer public keys

use crate::RptError;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::BTreeMap;

/// Known issuer public keys by key id.
///
/// Built once at startup and passed by reference; there is no global
/// registry to mutate at runtime.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: BTreeMap<String, VerifyingKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hex-encoded public key under a key id.
    pub fn add_hex(&mut self, kid: impl Into<String>, public_key_hex: &str) -> Result<(), RptError> {
        let bytes = hex::decode(public_key_hex)
            .map_err(|e| RptError::InvalidKey(format!("invalid public key hex: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RptError::InvalidKey("public key must be 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&array)
            .map_err(|e| RptError::InvalidKey(format!("invalid public key: {e}")))?;
        self.keys.insert(kid.into(), key);
        Ok(())
    }

    /// Verify a hex-encoded signature over `payload` with the key for `kid`.
    pub fn verify(&self, kid: &str, payload: &[u8], signature_hex: &str) -> Result<(), RptError> {
        let key = self
            .keys
            .get(kid)
            .ok_or_else(|| RptError::UnknownKid(kid.to_string()))?;

        let sig_bytes = hex::decode(signature_hex).map_err(|_| RptError::SignatureInvalid {
            kid: kid.to_string(),
        })?;
        let sig_array: [u8; 64] =
            sig_bytes
                .try_into()
                .map_err(|_| RptError::SignatureInvalid {
                    kid: kid.to_string(),
                })?;
        let signature = Signature::from_bytes(&sig_array);

        key.verify(payload, &signature)
            .map_err(|_| RptError::SignatureInvalid {
                kid: kid.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
