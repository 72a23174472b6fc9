//! Token issuance against the shared store

use crate::manifest::RulesManifest;
use crate::signer::TokenSigner;
use crate::token::{ReleaseProofToken, RptPayload, TokenStatus};
use crate::RptError;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use taxrail_core::{PeriodKey, PeriodState};
use taxrail_store::{parse_ts, Database, StoreError};
use uuid::Uuid;

/// Issues release-proof tokens for READY_RPT periods.
pub struct RptIssuer {
    db: Database,
    signer: TokenSigner,
    manifest: RulesManifest,
    window: Duration,
}

impl RptIssuer {
    pub fn new(db: Database, signer: TokenSigner, manifest: RulesManifest, window: Duration) -> Self {
        Self {
            db,
            signer,
            manifest,
            window,
        }
    }

    pub fn manifest(&self) -> &RulesManifest {
        &self.manifest
    }

    /// Issue a token for the period's final liability.
    ///
    /// Requires state READY_RPT. Any prior active token for the same period
    /// is marked expired in the same transaction, so exactly one token is
    /// ever active per period.
    pub fn issue(&self, key: &PeriodKey, actor: &str) -> Result<ReleaseProofToken, RptError> {
        let now = Utc::now();

        let token = self.db.with_tx(|tx| {
            let period = taxrail_store::periods::load(tx, key)?
                .ok_or_else(|| RptError::PeriodNotFound(key.clone()))?;
            if period.state != PeriodState::ReadyRpt {
                return Err(RptError::WrongState(period.state));
            }

            let payload = RptPayload {
                entity_id: key.entity_id.clone(),
                tax_type: key.tax_type,
                period_id: key.period_id.clone(),
                amount_cents: period.final_liability_cents,
                merkle_root: period.merkle_root.clone(),
                anomaly: period.anomaly.clone(),
                rates_version: self.manifest.rates_version.clone(),
                rules_manifest_hash: self.manifest.manifest_hash.clone(),
                expires_at: now + self.window,
                nonce: Uuid::new_v4().to_string(),
                kid: self.signer.kid().to_string(),
            };
            let signature = self.signer.sign(&payload.canonical_bytes()?);

            let token = ReleaseProofToken {
                token_id: format!("RPT-{}", Uuid::new_v4()),
                payload,
                signature,
                status: TokenStatus::Active,
                issued_at: now,
            };

            // Supersede, never delete.
            tx.execute(
                "UPDATE rpt_tokens SET status = 'expired'
                 WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3 AND status = 'active'",
                params![
                    key.entity_id.as_str(),
                    key.tax_type.to_string(),
                    key.period_id.as_str()
                ],
            )?;

            tx.execute(
                "INSERT INTO rpt_tokens
                 (token_id, entity_id, tax_type, period_id, payload_json, kid, signature,
                  status, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    token.token_id,
                    key.entity_id.as_str(),
                    key.tax_type.to_string(),
                    key.period_id.as_str(),
                    serde_json::to_string(&token.payload).map_err(StoreError::Serialization)?,
                    token.payload.kid,
                    token.signature,
                    token.status.as_str(),
                    token.issued_at.to_rfc3339(),
                    token.payload.expires_at.to_rfc3339(),
                ],
            )?;

            let audit_payload = serde_json::json!({
                "token_id": token.token_id,
                "period": key,
                "amount_cents": token.payload.amount_cents,
                "merkle_root": token.payload.merkle_root,
                "expires_at": token.payload.expires_at,
                "kid": token.payload.kid,
            });
            taxrail_audit::append(tx, actor, "rpt.issue", &audit_payload, now)?;

            Ok(token)
        })?;

        tracing::info!(period = %key, token_id = %token.token_id, "release proof token issued");
        Ok(token)
    }
}

/// Load the single active token for a period, if one exists.
pub fn load_active(
    conn: &Connection,
    key: &PeriodKey,
) -> Result<Option<ReleaseProofToken>, RptError> {
    let mut stmt = conn.prepare(
        "SELECT token_id, payload_json, signature, status, issued_at
         FROM rpt_tokens
         WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3 AND status = 'active'",
    )?;
    let mut rows = stmt.query(params![
        key.entity_id.as_str(),
        key.tax_type.to_string(),
        key.period_id.as_str()
    ])?;

    let row = match rows.next()? {
        Some(row) => row,
        None => return Ok(None),
    };

    let payload_json: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let issued_at_str: String = row.get(4)?;

    Ok(Some(ReleaseProofToken {
        token_id: row.get(0)?,
        payload: serde_json::from_str(&payload_json).map_err(StoreError::Serialization)?,
        signature: row.get(2)?,
        status: TokenStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Corrupt(format!("bad token status: {status_str}")))?,
        issued_at: parse_ts(&issued_at_str)?,
    }))
}
