//! Back-office configuration
//!
//! Financial-control thresholds never fall back to silent defaults: the
//! config file must spell out every field (`deny_unknown_fields`, no serde
//! defaults) or loading fails at startup. `OfficeConfig::dev` exists for
//! tests and local wiring only and is explicit at the call site.

use serde::{Deserialize, Serialize};
use std::path::Path;
use taxrail_approval::ApprovalConfig;
use taxrail_dispatch::DestinationEntry;
use taxrail_queue::QueueConfig;
use taxrail_recon::ReconConfig;
use taxrail_rpt::{RulesManifest, TokenSigner};
use thiserror::Error;

/// Errors from config loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rules manifest hash does not match its file list")]
    InconsistentRules,
}

/// One keyring row: a known issuer public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyringEntry {
    pub kid: String,
    pub public_key_hex: String,
}

/// Full back-office configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfficeConfig {
    /// Accounting basis recorded on new periods.
    pub basis: String,
    /// Validity window for issued release-proof tokens.
    pub rpt_window_hours: i64,
    pub recon: ReconConfig,
    pub approval: ApprovalConfig,
    pub queue: QueueConfig,
    pub rules: RulesManifest,
    pub destinations: Vec<DestinationEntry>,
    /// Hex seed of the token signing key.
    pub signer_seed_hex: String,
    pub keyring: Vec<KeyringEntry>,
}

impl OfficeConfig {
    /// Load from a JSON file, failing hard on any missing or unknown field
    /// and on an inconsistent rules manifest.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        if !config.rules.is_consistent() {
            return Err(ConfigError::InconsistentRules);
        }
        Ok(config)
    }

    /// Dev/test wiring around a freshly generated signer.
    pub fn dev(
        signer: &TokenSigner,
        rules: RulesManifest,
        destinations: Vec<DestinationEntry>,
    ) -> Self {
        Self {
            basis: "accrual".into(),
            rpt_window_hours: 24,
            recon: ReconConfig::default(),
            approval: ApprovalConfig::default(),
            queue: QueueConfig::default(),
            rules,
            destinations,
            signer_seed_hex: signer.seed_hex(),
            keyring: vec![KeyringEntry {
                kid: signer.kid().to_string(),
                public_key_hex: signer.public_key_hex(),
            }],
        }
    }
}
