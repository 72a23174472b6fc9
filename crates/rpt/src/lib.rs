//! Taxrail RPT - release-proof tokens
//!
//! A period that has reconciled clean earns one signed attestation binding
//! the entity, period, amount, ledger Merkle root, anomaly vector and the
//! loaded rules manifest. Verification is fail-closed: any mismatch is a
//! hard failure, never a warning.

mod issuer;
mod keyring;
mod manifest;
mod signer;
mod token;

pub use issuer::{load_active, RptIssuer};
pub use keyring::Keyring;
pub use manifest::{RuleFile, RulesManifest};
pub use signer::TokenSigner;
pub use token::{ReleaseProofToken, RptPayload, RptVerifier, TokenStatus, VerifiedRpt};

use taxrail_core::{PeriodKey, PeriodState};
use taxrail_store::StoreError;
use thiserror::Error;

/// Errors from token issuance and verification
#[derive(Debug, Error)]
pub enum RptError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] taxrail_audit::AuditError),

    #[error("Canonicalization error: {0}")]
    Canon(#[from] taxrail_core::CanonError),

    #[error("Period not found: {0}")]
    PeriodNotFound(PeriodKey),

    #[error("Period must be READY_RPT to issue, is {0}")]
    WrongState(PeriodState),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("No key in keyring for kid '{0}'")]
    UnknownKid(String),

    #[error("Signature verification failed for kid '{kid}'")]
    SignatureInvalid { kid: String },

    #[error("Token expired at {expired_at}")]
    Expired { expired_at: chrono::DateTime<chrono::Utc> },

    #[error("Token {field} does not match the loaded rules manifest")]
    RulesMismatch { field: &'static str },
}

impl From<rusqlite::Error> for RptError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}
