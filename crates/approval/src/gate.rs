//! Approval records and the gate itself

use crate::ApprovalError;
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use taxrail_core::canon::to_canonical_json;
use taxrail_core::hash::digest;
use taxrail_core::{Cents, PeriodKey};
use taxrail_store::{parse_ts, Database, StoreError};
use strum_macros::{Display, EnumString};

/// Who may register an approval.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalRole {
    /// May self-register the first approval, with a mandatory reason.
    Operator,
    /// Supplies the second, independent approval.
    Approver,
    /// Read-only; cannot approve.
    Auditor,
}

/// Gate policy.
///
/// No serde fallback defaults: a config file missing any of these fields
/// fails to load. `Default` is for tests and dev wiring only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalConfig {
    /// Releases at or above this amount require dual approval.
    pub threshold_cents: i64,
    /// Approvals older than this stop counting.
    pub ttl_hours: i64,
    /// Distinct approvers required.
    pub required_approvers: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            threshold_cents: 100_000,
            ttl_hours: 24,
            required_approvers: 2,
        }
    }
}

/// One registered approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub release_hash: String,
    pub approver_id: String,
    pub role: ApprovalRole,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Counts for operator dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStats {
    pub total: usize,
    pub within_ttl: usize,
}

/// Hash binding an approval to exactly one (period, amount) release.
pub fn release_hash(key: &PeriodKey, amount_cents: Cents) -> Result<String, ApprovalError> {
    let canonical = to_canonical_json(&serde_json::json!({
        "entity_id": key.entity_id,
        "tax_type": key.tax_type,
        "period_id": key.period_id,
        "amount_cents": amount_cents,
    }))?;
    Ok(digest(canonical))
}

/// The dual-approval gate.
pub struct ApprovalGate {
    db: Database,
    config: ApprovalConfig,
}

impl ApprovalGate {
    pub fn new(db: Database, config: ApprovalConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    /// Register one approval for a (period, amount) release.
    ///
    /// The reason is mandatory and the (release, approver) pair is unique;
    /// auditors cannot approve. Registration and its audit row share one
    /// transaction.
    pub fn register(
        &self,
        key: &PeriodKey,
        amount_cents: Cents,
        approver_id: &str,
        role: ApprovalRole,
        reason: &str,
    ) -> Result<Approval, ApprovalError> {
        if reason.trim().is_empty() {
            return Err(ApprovalError::EmptyReason);
        }
        if role == ApprovalRole::Auditor {
            return Err(ApprovalError::RoleNotPermitted(role));
        }

        let hash = release_hash(key, amount_cents)?;
        let now = Utc::now();
        let approval = Approval {
            release_hash: hash.clone(),
            approver_id: approver_id.to_string(),
            role,
            reason: reason.to_string(),
            created_at: now,
        };

        self.db.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT INTO approvals
                 (release_hash, entity_id, tax_type, period_id, amount_cents,
                  approver_id, role, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    approval.release_hash,
                    key.entity_id.as_str(),
                    key.tax_type.to_string(),
                    key.period_id.as_str(),
                    amount_cents.value(),
                    approval.approver_id,
                    approval.role.to_string(),
                    approval.reason,
                    approval.created_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) => {
                    let store_err = StoreError::from(err);
                    if store_err.is_unique_violation() {
                        return Err(ApprovalError::DuplicateApprover(approver_id.to_string()));
                    }
                    return Err(store_err.into());
                }
            }

            let payload = serde_json::json!({
                "release_hash": approval.release_hash,
                "period": key,
                "amount_cents": amount_cents,
                "approver_id": approval.approver_id,
                "role": approval.role,
                "reason": approval.reason,
            });
            taxrail_audit::append(tx, approver_id, "approval.register", &payload, now)?;
            Ok(())
        })?;

        tracing::info!(
            period = %key,
            approver = approver_id,
            "approval registered"
        );
        Ok(approval)
    }

    /// Check the gate for a release of `amount_cents`.
    ///
    /// A no-op below the threshold. At or above it, requires the configured
    /// number of distinct approvers within the TTL window for exactly this
    /// (period, amount); approvals for a since-changed amount surface as
    /// `AmountChanged` so the operator knows why the count looks wrong.
    pub fn ensure(&self, key: &PeriodKey, amount_cents: Cents) -> Result<(), ApprovalError> {
        if amount_cents.value() < self.config.threshold_cents {
            return Ok(());
        }

        let hash = release_hash(key, amount_cents)?;
        let cutoff = (Utc::now() - Duration::hours(self.config.ttl_hours)).to_rfc3339();

        self.db.with_conn(|conn| {
            let have: usize = conn.query_row(
                "SELECT COUNT(DISTINCT approver_id) FROM approvals
                 WHERE release_hash = ?1 AND created_at >= ?2",
                params![hash, cutoff],
                |row| row.get::<_, i64>(0),
            )? as usize;

            if have >= self.config.required_approvers {
                return Ok(());
            }

            let stale_amount: i64 = conn.query_row(
                "SELECT COUNT(*) FROM approvals
                 WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3
                   AND release_hash != ?4 AND created_at >= ?5",
                params![
                    key.entity_id.as_str(),
                    key.tax_type.to_string(),
                    key.period_id.as_str(),
                    hash,
                    cutoff
                ],
                |row| row.get(0),
            )?;
            if stale_amount > 0 {
                return Err(ApprovalError::AmountChanged);
            }

            Err(ApprovalError::Unmet {
                have,
                need: self.config.required_approvers,
            })
        })
    }

    /// Approvals registered for a release, newest first.
    pub fn list(&self, key: &PeriodKey, amount_cents: Cents) -> Result<Vec<Approval>, ApprovalError> {
        let hash = release_hash(key, amount_cents)?;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT release_hash, approver_id, role, reason, created_at
                 FROM approvals WHERE release_hash = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![hash], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut approvals = Vec::new();
            for row in rows {
                let (release_hash, approver_id, role, reason, created_at) =
                    row.map_err(StoreError::from)?;
                approvals.push(Approval {
                    release_hash,
                    approver_id,
                    role: role
                        .parse()
                        .map_err(|_| StoreError::Corrupt(format!("bad role: {role}")))?,
                    reason,
                    created_at: parse_ts(&created_at)?,
                });
            }
            Ok(approvals)
        })
    }

    /// Gate-wide counts.
    pub fn stats(&self) -> Result<ApprovalStats, ApprovalError> {
        let cutoff = (Utc::now() - Duration::hours(self.config.ttl_hours)).to_rfc3339();
        self.db.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM approvals", [], |row| row.get(0))?;
            let within_ttl: i64 = conn.query_row(
                "SELECT COUNT(*) FROM approvals WHERE created_at >= ?1",
                params![cutoff],
                |row| row.get(0),
            )?;
            Ok(ApprovalStats {
                total: total as usize,
                within_ttl: within_ttl as usize,
            })
        })
    }
}
