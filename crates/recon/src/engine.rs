//! Reconciliation engine

use crate::sources::{ComponentTotals, SourceAggregates};
use crate::ReconError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use taxrail_core::{Cents, PeriodKey, PeriodState};
use taxrail_store::{parse_ts, Database, StoreError};

/// Reconciliation policy.
///
/// Deserialized without fallback defaults: a missing tolerance in loaded
/// configuration is a startup error, not a silently-applied default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    /// Maximum |reported - expected| per component, in minor units.
    pub tolerance_cents: i64,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            tolerance_cents: 100,
        }
    }
}

/// Delta for one liability component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDelta {
    pub component: String,
    pub expected_cents: i64,
    pub reported_cents: i64,
    pub delta_cents: i64,
    pub event_count: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ComponentDelta {
    fn from_totals(totals: &ComponentTotals) -> Self {
        Self {
            component: totals.component.clone(),
            expected_cents: totals.expected_cents,
            reported_cents: totals.reported_cents,
            delta_cents: totals.reported_cents - totals.expected_cents,
            event_count: totals.event_count,
            last_event_at: totals.last_event_at,
        }
    }
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconOutcome {
    Ready,
    Discrepancy,
    Anomaly,
}

impl ReconOutcome {
    fn target_state(self) -> PeriodState {
        match self {
            ReconOutcome::Ready => PeriodState::ReadyRpt,
            ReconOutcome::Discrepancy => PeriodState::BlockedDiscrepancy,
            ReconOutcome::Anomaly => PeriodState::BlockedAnomaly,
        }
    }
}

/// Full result of `recompute`, also the audit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub key: PeriodKey,
    pub outcome: ReconOutcome,
    pub tolerance_cents: i64,
    pub ledger_balance_cents: i64,
    pub total_reported_cents: i64,
    pub components: Vec<ComponentDelta>,
    /// Anomaly metrics that exceeded (or lacked) a threshold.
    pub anomalies: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

/// Recomputes period totals and advances the period state machine.
pub struct ReconciliationEngine {
    db: Database,
    config: ReconConfig,
}

impl ReconciliationEngine {
    pub fn new(db: Database, config: ReconConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Re-derive totals from the upstream aggregates and transition the
    /// period.
    ///
    /// Idempotent: re-running with unchanged inputs yields the same result
    /// and never moves an advanced state backward - a blocked or ready
    /// period passes through CLOSING again, a released period is frozen.
    /// Appends exactly one audit entry carrying the full result payload,
    /// in the same transaction as the state change.
    pub fn recompute(
        &self,
        sources: &dyn SourceAggregates,
        key: &PeriodKey,
        actor: &str,
    ) -> Result<ReconciliationResult, ReconError> {
        // External reads stay outside the store transaction.
        let totals = sources.component_totals(&key.entity_id, &key.period_id)?;
        let now = Utc::now();

        let result = self.db.with_tx(|tx| {
            let mut period = taxrail_store::periods::load(tx, key)?
                .ok_or_else(|| ReconError::PeriodNotFound(key.clone()))?;

            if period.state == PeriodState::Released {
                return Err(ReconError::AlreadyReleased(key.clone()));
            }
            if period.state != PeriodState::Closing {
                period.transition(PeriodState::Closing, now)?;
            }

            let components: Vec<ComponentDelta> =
                totals.iter().map(ComponentDelta::from_totals).collect();
            let total_reported: i64 = components.iter().map(|c| c.reported_cents).sum();
            let ledger_balance = taxrail_ledger::balance(tx, key)?;

            let discrepant = components
                .iter()
                .any(|c| c.delta_cents.abs() > self.config.tolerance_cents)
                || (total_reported - ledger_balance).abs() > self.config.tolerance_cents;

            // Fail closed: an observed metric without a threshold blocks.
            let mut anomalies: Vec<String> = Vec::new();
            for (metric, observed) in &period.anomaly {
                match period.thresholds.get(metric) {
                    Some(limit) if observed <= limit => {}
                    _ => anomalies.push(metric.clone()),
                }
            }

            let outcome = if discrepant {
                ReconOutcome::Discrepancy
            } else if !anomalies.is_empty() {
                ReconOutcome::Anomaly
            } else {
                ReconOutcome::Ready
            };

            // Write the computed inputs back for idempotent re-runs.
            for component in &components {
                write_component(tx, key, component, now)?;
            }

            if outcome == ReconOutcome::Ready {
                let entries = taxrail_ledger::entries(tx, key)?;
                period.merkle_root = taxrail_ledger::slice_merkle_root(&entries);
                period.running_balance_hash = entries
                    .last()
                    .map(|e| e.hash_after.clone())
                    .unwrap_or_default();
                period.final_liability_cents = Cents::new(ledger_balance)
                    .map_err(|_| StoreError::Corrupt("negative ledger balance".into()))?;
            }

            period.transition(outcome.target_state(), now)?;
            taxrail_store::periods::upsert(tx, &period)?;

            let result = ReconciliationResult {
                key: key.clone(),
                outcome,
                tolerance_cents: self.config.tolerance_cents,
                ledger_balance_cents: ledger_balance,
                total_reported_cents: total_reported,
                components,
                anomalies,
                computed_at: now,
            };

            let payload = serde_json::to_value(&result).map_err(StoreError::Serialization)?;
            taxrail_audit::append(tx, actor, "recon.recompute", &payload, now)?;

            Ok(result)
        })?;

        tracing::info!(
            period = %key,
            outcome = ?result.outcome,
            balance = result.ledger_balance_cents,
            "reconciliation recomputed"
        );
        Ok(result)
    }

    /// Move a blocked period back to OPEN so its inputs can be corrected.
    pub fn reopen(&self, key: &PeriodKey, actor: &str) -> Result<(), ReconError> {
        let now = Utc::now();
        self.db.with_tx(|tx| {
            let mut period = taxrail_store::periods::load(tx, key)?
                .ok_or_else(|| ReconError::PeriodNotFound(key.clone()))?;
            if !period.state.is_blocked() {
                return Err(ReconError::NotBlocked(key.clone()));
            }
            let from = period.state;
            period.transition(PeriodState::Open, now)?;
            taxrail_store::periods::upsert(tx, &period)?;
            let payload = serde_json::json!({
                "period": key,
                "from": from,
                "to": PeriodState::Open,
            });
            taxrail_audit::append(tx, actor, "period.reopen", &payload, now)?;
            Ok(())
        })
    }
}

fn write_component(
    conn: &Connection,
    key: &PeriodKey,
    component: &ComponentDelta,
    now: DateTime<Utc>,
) -> Result<(), ReconError> {
    conn.execute(
        "INSERT OR REPLACE INTO recon_components
         (entity_id, tax_type, period_id, component, expected_cents, reported_cents,
          delta_cents, event_count, last_event_at, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            key.entity_id.as_str(),
            key.tax_type.to_string(),
            key.period_id.as_str(),
            component.component,
            component.expected_cents,
            component.reported_cents,
            component.delta_cents,
            component.event_count as i64,
            component.last_event_at.map(|t| t.to_rfc3339()),
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Stored component deltas for a period (read by the evidence builder).
pub fn read_components(
    conn: &Connection,
    key: &PeriodKey,
) -> Result<Vec<ComponentDelta>, ReconError> {
    let mut stmt = conn.prepare(
        "SELECT component, expected_cents, reported_cents, delta_cents, event_count, last_event_at
         FROM recon_components
         WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3
         ORDER BY component",
    )?;
    let rows = stmt.query_map(
        params![
            key.entity_id.as_str(),
            key.tax_type.to_string(),
            key.period_id.as_str()
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        },
    )?;

    let mut components = Vec::new();
    for row in rows {
        let (component, expected, reported, delta, event_count, last_event) =
            row.map_err(StoreError::from)?;
        components.push(ComponentDelta {
            component,
            expected_cents: expected,
            reported_cents: reported,
            delta_cents: delta,
            event_count: event_count as u64,
            last_event_at: last_event.as_deref().map(parse_ts).transpose()?,
        });
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxrail_core::hash::digest;
    use taxrail_core::{EntityId, Period, PeriodId, TaxType};

    struct FixedSources(Vec<ComponentTotals>);

    impl SourceAggregates for FixedSources {
        fn component_totals(
            &self,
            _entity_id: &EntityId,
            _period_id: &PeriodId,
        ) -> Result<Vec<ComponentTotals>, crate::SourceError> {
            Ok(self.0.clone())
        }
    }

    fn key() -> PeriodKey {
        PeriodKey::new(
            EntityId::new("12345678901").unwrap(),
            TaxType::WithheldTax,
            PeriodId::new("2025-09").unwrap(),
        )
    }

    fn totals(expected: i64, reported: i64) -> ComponentTotals {
        ComponentTotals {
            component: "withheld_tax".into(),
            expected_cents: expected,
            reported_cents: reported,
            event_count: 4,
            last_event_at: Some(Utc::now()),
        }
    }

    fn seed_period(db: &Database, credited: i64) {
        let mut period = Period::open(key(), "accrual", Utc::now());
        period.credited_cents = Cents::new(credited).unwrap();
        db.with_tx(|tx| {
            taxrail_store::periods::upsert(tx, &period)?;
            if credited > 0 {
                taxrail_ledger::append(
                    tx,
                    &key(),
                    "accrual-1",
                    credited,
                    &digest("accrual-receipt"),
                    Utc::now(),
                )
                .map_err(|e| match e {
                    taxrail_ledger::LedgerError::Store(s) => s,
                    other => StoreError::Corrupt(other.to_string()),
                })?;
            }
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_matching_totals_reach_ready() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 150_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        let sources = FixedSources(vec![totals(150_000, 150_000)]);

        let result = engine.recompute(&sources, &key(), "system").unwrap();
        assert_eq!(result.outcome, ReconOutcome::Ready);

        let period = db
            .with_conn(|c| taxrail_store::periods::load(c, &key()))
            .unwrap()
            .unwrap();
        assert_eq!(period.state, PeriodState::ReadyRpt);
        assert_eq!(period.final_liability_cents.value(), 150_000);
        assert!(!period.merkle_root.is_empty());
    }

    #[test]
    fn test_discrepancy_blocks() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 150_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        let sources = FixedSources(vec![totals(150_000, 149_000)]);

        let result = engine.recompute(&sources, &key(), "system").unwrap();
        assert_eq!(result.outcome, ReconOutcome::Discrepancy);

        let period = db
            .with_conn(|c| taxrail_store::periods::load(c, &key()))
            .unwrap()
            .unwrap();
        assert_eq!(period.state, PeriodState::BlockedDiscrepancy);
    }

    #[test]
    fn test_within_tolerance_passes() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 150_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        // 100 minor units off, equal to the default tolerance
        let sources = FixedSources(vec![totals(150_100, 150_000)]);

        let result = engine.recompute(&sources, &key(), "system").unwrap();
        assert_eq!(result.outcome, ReconOutcome::Ready);
    }

    #[test]
    fn test_blocked_recovers_after_inputs_fixed() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 150_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());

        let bad = FixedSources(vec![totals(150_000, 100_000)]);
        let result = engine.recompute(&bad, &key(), "system").unwrap();
        assert_eq!(result.outcome, ReconOutcome::Discrepancy);

        let good = FixedSources(vec![totals(150_000, 150_000)]);
        let result = engine.recompute(&good, &key(), "system").unwrap();
        assert_eq!(result.outcome, ReconOutcome::Ready);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 150_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        let sources = FixedSources(vec![totals(150_000, 150_000)]);

        let first = engine.recompute(&sources, &key(), "system").unwrap();
        let second = engine.recompute(&sources, &key(), "system").unwrap();
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.ledger_balance_cents, second.ledger_balance_cents);

        let period = db
            .with_conn(|c| taxrail_store::periods::load(c, &key()))
            .unwrap()
            .unwrap();
        assert_eq!(period.state, PeriodState::ReadyRpt);
    }

    #[test]
    fn test_anomaly_blocks_after_clean_totals() {
        let db = Database::in_memory().unwrap();
        let mut period = Period::open(key(), "accrual", Utc::now());
        period.anomaly.insert("filing_velocity".into(), 50);
        period.thresholds.insert("filing_velocity".into(), 10);
        db.with_tx(|tx| taxrail_store::periods::upsert(tx, &period))
            .unwrap();

        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        let sources = FixedSources(vec![totals(0, 0)]);
        let result = engine.recompute(&sources, &key(), "system").unwrap();
        assert_eq!(result.outcome, ReconOutcome::Anomaly);
        assert_eq!(result.anomalies, vec!["filing_velocity".to_string()]);
    }

    #[test]
    fn test_metric_without_threshold_blocks() {
        let db = Database::in_memory().unwrap();
        let mut period = Period::open(key(), "accrual", Utc::now());
        period.anomaly.insert("unmodelled_metric".into(), 1);
        db.with_tx(|tx| taxrail_store::periods::upsert(tx, &period))
            .unwrap();

        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        let result = engine
            .recompute(&FixedSources(vec![totals(0, 0)]), &key(), "system")
            .unwrap();
        assert_eq!(result.outcome, ReconOutcome::Anomaly);
    }

    #[test]
    fn test_missing_period_errors() {
        let db = Database::in_memory().unwrap();
        let engine = ReconciliationEngine::new(db, ReconConfig::default());
        let err = engine
            .recompute(&FixedSources(vec![]), &key(), "system")
            .unwrap_err();
        assert!(matches!(err, ReconError::PeriodNotFound(_)));
    }

    #[test]
    fn test_recompute_appends_one_audit_entry() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 1_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        engine
            .recompute(&FixedSources(vec![totals(1_000, 1_000)]), &key(), "system")
            .unwrap();

        let entries = db.with_conn(taxrail_audit::read_all).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "recon.recompute");
    }

    #[test]
    fn test_reopen_blocked_period() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 1_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        engine
            .recompute(&FixedSources(vec![totals(1_000, 5_000)]), &key(), "system")
            .unwrap();

        engine.reopen(&key(), "operator-1").unwrap();
        let period = db
            .with_conn(|c| taxrail_store::periods::load(c, &key()))
            .unwrap()
            .unwrap();
        assert_eq!(period.state, PeriodState::Open);

        let err = engine.reopen(&key(), "operator-1").unwrap_err();
        assert!(matches!(err, ReconError::NotBlocked(_)));
    }

    #[test]
    fn test_read_components_roundtrip() {
        let db = Database::in_memory().unwrap();
        seed_period(&db, 1_000);
        let engine = ReconciliationEngine::new(db.clone(), ReconConfig::default());
        engine
            .recompute(&FixedSources(vec![totals(1_000, 900)]), &key(), "system")
            .unwrap();

        let components = db.with_conn(|c| read_components(c, &key())).unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].delta_cents, -100);
    }
}
