//! Period row persistence
//!
//! Periods are created OPEN on first accrual and only ever updated in place;
//! there is no delete path.

use crate::error::StoreError;
use crate::parse_ts;
use rusqlite::{params, Connection};
use taxrail_core::{
    AnomalyThresholds, AnomalyVector, Cents, EntityId, Period, PeriodId, PeriodKey, PeriodState,
    TaxType,
};

/// Load one period, if it exists.
pub fn load(conn: &Connection, key: &PeriodKey) -> Result<Option<Period>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT state, basis, accrued_cents, credited_cents, final_liability_cents,
                merkle_root, running_balance_hash, anomaly_json, thresholds_json,
                created_at, updated_at
         FROM periods WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3",
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

    let state_str: String = row.get(0)?;
    let state: PeriodState = state_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("bad period state: {state_str}")))?;
    let anomaly_json: String = row.get(7)?;
    let thresholds_json: String = row.get(8)?;
    let anomaly: AnomalyVector = serde_json::from_str(&anomaly_json)?;
    let thresholds: AnomalyThresholds = serde_json::from_str(&thresholds_json)?;

    let accrued: i64 = row.get(2)?;
    let credited: i64 = row.get(3)?;
    let final_liability: i64 = row.get(4)?;
    let to_cents = |v: i64, field: &str| {
        Cents::new(v).map_err(|_| StoreError::Corrupt(format!("negative {field}: {v}")))
    };

    Ok(Some(Period {
        key: key.clone(),
        state,
        basis: row.get(1)?,
        accrued_cents: to_cents(accrued, "accrued_cents")?,
        credited_cents: to_cents(credited, "credited_cents")?,
        final_liability_cents: to_cents(final_liability, "final_liability_cents")?,
        merkle_root: row.get(5)?,
        running_balance_hash: row.get(6)?,
        anomaly,
        thresholds,
        created_at: parse_ts(&row.get::<_, String>(9)?)?,
        updated_at: parse_ts(&row.get::<_, String>(10)?)?,
    }))
}

/// Insert or update a period row.
pub fn upsert(conn: &Connection, period: &Period) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO periods
         (entity_id, tax_type, period_id, state, basis, accrued_cents, credited_cents,
          final_liability_cents, merkle_root, running_balance_hash, anomaly_json,
          thresholds_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(entity_id, tax_type, period_id) DO UPDATE SET
            state = excluded.state,
            basis = excluded.basis,
            accrued_cents = excluded.accrued_cents,
            credited_cents = excluded.credited_cents,
            final_liability_cents = excluded.final_liability_cents,
            merkle_root = excluded.merkle_root,
            running_balance_hash = excluded.running_balance_hash,
            anomaly_json = excluded.anomaly_json,
            thresholds_json = excluded.thresholds_json,
            updated_at = excluded.updated_at",
        params![
            period.key.entity_id.as_str(),
            period.key.tax_type.to_string(),
            period.key.period_id.as_str(),
            period.state.to_string(),
            period.basis,
            period.accrued_cents.value(),
            period.credited_cents.value(),
            period.final_liability_cents.value(),
            period.merkle_root,
            period.running_balance_hash,
            serde_json::to_string(&period.anomaly)?,
            serde_json::to_string(&period.thresholds)?,
            period.created_at.to_rfc3339(),
            period.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// All period keys currently in the store.
pub fn list_keys(conn: &Connection) -> Result<Vec<PeriodKey>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, tax_type, period_id FROM periods
         ORDER BY entity_id, tax_type, period_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut keys = Vec::new();
    for row in rows {
        let (entity, tax_type, period) = row?;
        keys.push(PeriodKey::new(
            EntityId::new(entity.clone())
                .map_err(|_| StoreError::Corrupt(format!("bad entity id: {entity}")))?,
            TaxType::parse(&tax_type)
                .map_err(|_| StoreError::Corrupt(format!("bad tax type: {tax_type}")))?,
            PeriodId::new(period.clone())
                .map_err(|_| StoreError::Corrupt(format!("bad period id: {period}")))?,
        ));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Utc;

    fn key() -> PeriodKey {
        PeriodKey::new(
            EntityId::new("12345678901").unwrap(),
            TaxType::SalesTax,
            PeriodId::new("2025-09").unwrap(),
        )
    }

    #[test]
    fn test_load_missing_is_none() {
        let db = Database::in_memory().unwrap();
        let loaded = db.with_conn(|conn| load(conn, &key())).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_upsert_roundtrip() {
        let db = Database::in_memory().unwrap();
        let mut period = Period::open(key(), "accrual", Utc::now());
        period.accrued_cents = Cents::new(150_000).unwrap();
        period.anomaly.insert("late_events".into(), 3);
        period.thresholds.insert("late_events".into(), 10);

        db.with_tx(|tx| upsert(tx, &period)).unwrap();
        let loaded = db.with_conn(|conn| load(conn, &key())).unwrap().unwrap();
        assert_eq!(loaded.accrued_cents.value(), 150_000);
        assert_eq!(loaded.state, PeriodState::Open);
        assert_eq!(loaded.anomaly.get("late_events"), Some(&3));

        // Update in place
        let mut updated = loaded;
        updated.transition(PeriodState::Closing, Utc::now()).unwrap();
        db.with_tx(|tx| upsert(tx, &updated)).unwrap();
        let reloaded = db.with_conn(|conn| load(conn, &key())).unwrap().unwrap();
        assert_eq!(reloaded.state, PeriodState::Closing);
    }

    #[test]
    fn test_list_keys() {
        let db = Database::in_memory().unwrap();
        db.with_tx(|tx| upsert(tx, &Period::open(key(), "accrual", Utc::now())))
            .unwrap();
        let keys = db.with_conn(list_keys).unwrap();
        assert_eq!(keys, vec![key()]);
    }
}
