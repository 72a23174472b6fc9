//! Token payload, record and verifier

use crate::keyring::Keyring;
use crate::manifest::RulesManifest;
use crate::RptError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taxrail_core::canon::to_canonical_json;
use taxrail_core::{AnomalyVector, Cents, EntityId, PeriodId, TaxType};

/// The signed attestation payload. Every field is covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RptPayload {
    pub entity_id: EntityId,
    pub tax_type: TaxType,
    pub period_id: PeriodId,
    pub amount_cents: Cents,
    pub merkle_root: String,
    pub anomaly: AnomalyVector,
    pub rates_version: String,
    pub rules_manifest_hash: String,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    pub kid: String,
}

impl RptPayload {
    /// The exact bytes the signature covers.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, RptError> {
        Ok(to_canonical_json(self)?.into_bytes())
    }
}

/// Lifecycle status of a persisted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TokenStatus::Active),
            "expired" => Some(TokenStatus::Expired),
            _ => None,
        }
    }
}

/// A persisted release-proof token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseProofToken {
    pub token_id: String,
    pub payload: RptPayload,
    /// Hex-encoded Ed25519 signature over the canonical payload bytes.
    pub signature: String,
    pub status: TokenStatus,
    pub issued_at: DateTime<Utc>,
}

/// Successful verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRpt {
    pub kid: String,
}

/// Fail-closed token verifier.
pub struct RptVerifier {
    keyring: Keyring,
    manifest: RulesManifest,
}

impl RptVerifier {
    pub fn new(keyring: Keyring, manifest: RulesManifest) -> Self {
        Self { keyring, manifest }
    }

    /// Recompute the canonical bytes and check signature, expiry and rules
    /// binding. Any mismatch is an error, never a warning.
    pub fn verify(
        &self,
        token: &ReleaseProofToken,
        now: DateTime<Utc>,
    ) -> Result<VerifiedRpt, RptError> {
        let bytes = token.payload.canonical_bytes()?;
        self.keyring
            .verify(&token.payload.kid, &bytes, &token.signature)?;

        if token.payload.expires_at <= now {
            return Err(RptError::Expired {
                expired_at: token.payload.expires_at,
            });
        }
        if token.payload.rates_version != self.manifest.rates_version {
            return Err(RptError::RulesMismatch {
                field: "rates_version",
            });
        }
        if token.payload.rules_manifest_hash != self.manifest.manifest_hash {
            return Err(RptError::RulesMismatch {
                field: "rules_manifest_hash",
            });
        }

        Ok(VerifiedRpt {
            kid: token.payload.kid.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RuleFile;
    use crate::TokenSigner;
    use chrono::Duration;
    use taxrail_core::hash::digest;

    fn manifest() -> RulesManifest {
        RulesManifest::new(
            "2025.3",
            vec![RuleFile {
                path: "rates/withheld_tax.json".into(),
                sha256: digest("rates"),
            }],
        )
        .unwrap()
    }

    fn signed_token(signer: &TokenSigner, manifest: &RulesManifest) -> ReleaseProofToken {
        let payload = RptPayload {
            entity_id: EntityId::new("12345678901").unwrap(),
            tax_type: TaxType::WithheldTax,
            period_id: PeriodId::new("2025-09").unwrap(),
            amount_cents: Cents::new(150_000).unwrap(),
            merkle_root: digest("merkle"),
            anomaly: AnomalyVector::new(),
            rates_version: manifest.rates_version.clone(),
            rules_manifest_hash: manifest.manifest_hash.clone(),
            expires_at: Utc::now() + Duration::hours(24),
            nonce: "nonce-1".into(),
            kid: signer.kid().to_string(),
        };
        let signature = signer.sign(&payload.canonical_bytes().unwrap());
        ReleaseProofToken {
            token_id: "RPT-test".into(),
            payload,
            signature,
            status: TokenStatus::Active,
            issued_at: Utc::now(),
        }
    }

    fn verifier_for(signer: &TokenSigner, manifest: RulesManifest) -> RptVerifier {
        let mut keyring = Keyring::new();
        keyring
            .add_hex(signer.kid(), &signer.public_key_hex())
            .unwrap();
        RptVerifier::new(keyring, manifest)
    }

    #[test]
    fn test_verify_fresh_token() {
        let signer = TokenSigner::generate();
        let manifest = manifest();
        let token = signed_token(&signer, &manifest);
        let verifier = verifier_for(&signer, manifest);

        let verified = verifier.verify(&token, Utc::now()).unwrap();
        assert_eq!(verified.kid, signer.kid());
    }

    #[test]
    fn test_any_mutated_field_fails() {
        let signer = TokenSigner::generate();
        let manifest = manifest();
        let verifier = verifier_for(&signer, manifest.clone());

        let mut tampered_amount = signed_token(&signer, &manifest);
        tampered_amount.payload.amount_cents = Cents::new(1).unwrap();
        assert!(matches!(
            verifier.verify(&tampered_amount, Utc::now()),
            Err(RptError::SignatureInvalid { .. })
        ));

        let mut tampered_period = signed_token(&signer, &manifest);
        tampered_period.payload.period_id = PeriodId::new("2025-10").unwrap();
        assert!(verifier.verify(&tampered_period, Utc::now()).is_err());

        let mut tampered_root = signed_token(&signer, &manifest);
        tampered_root.payload.merkle_root = digest("other-root");
        assert!(verifier.verify(&tampered_root, Utc::now()).is_err());
    }

    #[test]
    fn test_expired_token_fails() {
        let signer = TokenSigner::generate();
        let manifest = manifest();
        let token = signed_token(&signer, &manifest);
        let verifier = verifier_for(&signer, manifest);

        let later = token.payload.expires_at + Duration::seconds(1);
        assert!(matches!(
            verifier.verify(&token, later),
            Err(RptError::Expired { .. })
        ));
    }

    #[test]
    fn test_rules_drift_fails() {
        let signer = TokenSigner::generate();
        let issued_under = manifest();
        let token = signed_token(&signer, &issued_under);

        let reloaded = RulesManifest::new(
            "2025.4",
            vec![RuleFile {
                path: "rates/withheld_tax.json".into(),
                sha256: digest("new rates"),
            }],
        )
        .unwrap();
        let verifier = verifier_for(&signer, reloaded);

        assert!(matches!(
            verifier.verify(&token, Utc::now()),
            Err(RptError::RulesMismatch { .. })
        ));
    }

    #[test]
    fn test_foreign_signer_rejected() {
        let signer = TokenSigner::generate();
        let impostor = TokenSigner::generate().with_kid(signer.kid().to_string());
        let manifest = manifest();
        let token = signed_token(&impostor, &manifest);
        let verifier = verifier_for(&signer, manifest);

        assert!(matches!(
            verifier.verify(&token, Utc::now()),
            Err(RptError::SignatureInvalid { .. })
        ));
    }
}
