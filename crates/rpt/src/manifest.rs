//! Versioned, hash-addressed rules/rates manifest
//!
//! Tokens bind the manifest version and hash at issuance time; verification
//! re-checks both against whatever manifest is currently loaded.

use serde::{Deserialize, Serialize};
use taxrail_core::canon::to_canonical_json;
use taxrail_core::hash::digest;
use taxrail_core::CanonError;

/// One file of the rules manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFile {
    pub path: String,
    pub sha256: String,
}

/// The loaded rules/rates configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesManifest {
    pub rates_version: String,
    pub manifest_hash: String,
    pub files: Vec<RuleFile>,
}

impl RulesManifest {
    /// Build a manifest, deriving `manifest_hash` from the file list.
    pub fn new(rates_version: impl Into<String>, files: Vec<RuleFile>) -> Result<Self, CanonError> {
        let rates_version = rates_version.into();
        let manifest_hash = Self::compute_hash(&rates_version, &files)?;
        Ok(Self {
            rates_version,
            manifest_hash,
            files,
        })
    }

    /// Content hash over the version and the canonical file list.
    pub fn compute_hash(rates_version: &str, files: &[RuleFile]) -> Result<String, CanonError> {
        let canonical = to_canonical_json(&serde_json::json!({
            "rates_version": rates_version,
            "files": files,
        }))?;
        Ok(digest(canonical))
    }

    /// Recompute and compare the stored hash.
    pub fn is_consistent(&self) -> bool {
        Self::compute_hash(&self.rates_version, &self.files)
            .map(|h| h == self.manifest_hash)
            .unwrap_or(false)
    }
}
