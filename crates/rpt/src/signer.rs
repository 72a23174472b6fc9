//! Ed25519 token signer

use crate::RptError;
use ed25519_dalek::{Signer as DalekSigner, SigningKey};

/// Holds the issuer's private key.
///
/// The key id defaults to the first 16 hex characters of the public key so a
/// keyring can address rotated keys without shipping the full key inline.
pub struct TokenSigner {
    signing_key: SigningKey,
    kid: String,
}

impl TokenSigner {
    /// Create from a 32-byte hex-encoded seed.
    pub fn from_hex(hex_seed: &str) -> Result<Self, RptError> {
        let bytes = hex::decode(hex_seed)
            .map_err(|e| RptError::InvalidKey(format!("invalid seed hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RptError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_hex = hex::encode(signing_key.verifying_key().to_bytes());
        let kid = public_hex[..16].to_string();
        Self { signing_key, kid }
    }

    /// Override the derived key id.
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    /// Export the seed as hex, for storage.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Hex-encoded public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign raw canonical bytes; returns the hex-encoded signature.
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.signing_key.sign(payload).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_roundtrip() {
        let signer = TokenSigner::generate();
        let restored = TokenSigner::from_hex(&signer.seed_hex()).unwrap();
        assert_eq!(signer.public_key_hex(), restored.public_key_hex());
        assert_eq!(signer.kid(), restored.kid());
    }

    #[test]
    fn test_kid_is_public_key_prefix() {
        let signer = TokenSigner::generate();
        assert_eq!(signer.kid(), &signer.public_key_hex()[..16]);
    }

    #[test]
    fn test_bad_seed_rejected() {
        assert!(matches!(
            TokenSigner::from_hex("zz"),
            Err(RptError::InvalidKey(_))
        ));
        assert!(matches!(
            TokenSigner::from_hex("abcd"),
            Err(RptError::InvalidKey(_))
        ));
    }
}
