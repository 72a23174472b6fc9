//! Database handle and schema

use crate::error::StoreError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Handle to the shared SQLite store.
///
/// Cloning is cheap; all clones share one serialized connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one immediate (write-locking) transaction.
    ///
    /// Commits on `Ok`, rolls back wholesale on `Err`. All chain appends
    /// (ledger tail, audit tail) MUST go through here: the mutex and the
    /// immediate transaction together serialize "read tail, compute next
    /// hash, insert", so two appenders can never observe the same prev hash.
    pub fn with_tx<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(result)
    }

    /// Run `f` with read access to the connection.
    ///
    /// Point reads only; multi-row snapshots that must be consistent belong
    /// in [`Self::with_tx`].
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS periods (
            entity_id TEXT NOT NULL,
            tax_type TEXT NOT NULL,
            period_id TEXT NOT NULL,
            state TEXT NOT NULL,
            basis TEXT NOT NULL,
            accrued_cents INTEGER NOT NULL,
            credited_cents INTEGER NOT NULL,
            final_liability_cents INTEGER NOT NULL,
            merkle_root TEXT NOT NULL,
            running_balance_hash TEXT NOT NULL,
            anomaly_json TEXT NOT NULL,
            thresholds_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, tax_type, period_id)
        );

        CREATE TABLE IF NOT EXISTS ledger_entries (
            entity_id TEXT NOT NULL,
            tax_type TEXT NOT NULL,
            period_id TEXT NOT NULL,
            entry_id INTEGER NOT NULL,
            transfer_id TEXT NOT NULL UNIQUE,
            amount_cents INTEGER NOT NULL,
            balance_after_cents INTEGER NOT NULL,
            receipt_hash TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            hash_after TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, tax_type, period_id, entry_id)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            seq INTEGER PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            terminal_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_payload_hash
            ON audit_log(payload_hash);

        CREATE TABLE IF NOT EXISTS rpt_tokens (
            token_id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            tax_type TEXT NOT NULL,
            period_id TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            kid TEXT NOT NULL,
            signature TEXT NOT NULL,
            status TEXT NOT NULL,
            issued_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rpt_single_active
            ON rpt_tokens(entity_id, tax_type, period_id) WHERE status = 'active';

        CREATE TABLE IF NOT EXISTS approvals (
            release_hash TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            tax_type TEXT NOT NULL,
            period_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            approver_id TEXT NOT NULL,
            role TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (release_hash, approver_id)
        );

        CREATE TABLE IF NOT EXISTS dead_letters (
            transfer_id TEXT PRIMARY KEY,
            payload_json TEXT NOT NULL,
            last_error TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            first_seen_at TEXT NOT NULL,
            last_error_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transfer_markers (
            transfer_id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            tax_type TEXT NOT NULL,
            period_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            rail TEXT NOT NULL,
            reference TEXT NOT NULL,
            receipt_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recon_components (
            entity_id TEXT NOT NULL,
            tax_type TEXT NOT NULL,
            period_id TEXT NOT NULL,
            component TEXT NOT NULL,
            expected_cents INTEGER NOT NULL,
            reported_cents INTEGER NOT NULL,
            delta_cents INTEGER NOT NULL,
            event_count INTEGER NOT NULL,
            last_event_at TEXT,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, tax_type, period_id, component)
        );",
    )?;
    Ok(())
}
