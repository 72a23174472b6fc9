//! The remittance period and its state lattice
//!
//! ```text
//! OPEN ──► CLOSING ──► READY_RPT ──► RELEASED
//!             │  ▲        │
//!             │  └────────┘ (re-reconcile)
//!             ▼
//!   BLOCKED_DISCREPANCY / BLOCKED_ANOMALY ──► CLOSING | OPEN
//! ```
//!
//! Transitions are monotonic along this lattice; `RELEASED` is terminal and
//! a blocked period can only move forward again through reconciliation.

use crate::ids::PeriodKey;
use crate::units::Cents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Observed anomaly metrics for a period (metric name -> observed value).
///
/// BTreeMap keeps canonical JSON stable.
pub type AnomalyVector = BTreeMap<String, i64>;

/// Policy limits the anomaly vector is compared against.
pub type AnomalyThresholds = BTreeMap<String, i64>;

/// Errors from period state handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("Transition {from} -> {to} is not on the period lattice")]
    IllegalTransition { from: PeriodState, to: PeriodState },

    #[error("Period is released; amounts and state are frozen")]
    Released,

    #[error("Amounts may only change in OPEN or CLOSING, period is {0}")]
    AmountsFrozen(PeriodState),
}

/// Period lifecycle states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodState {
    Open,
    Closing,
    ReadyRpt,
    BlockedDiscrepancy,
    BlockedAnomaly,
    Released,
}

impl PeriodState {
    /// Whether `self -> to` is on the lattice.
    pub fn can_transition(self, to: PeriodState) -> bool {
        use PeriodState::*;
        matches!(
            (self, to),
            (Open, Closing)
                | (Closing, ReadyRpt)
                | (Closing, BlockedDiscrepancy)
                | (Closing, BlockedAnomaly)
                | (ReadyRpt, Closing)
                | (ReadyRpt, Released)
                | (BlockedDiscrepancy, Closing)
                | (BlockedDiscrepancy, Open)
                | (BlockedAnomaly, Closing)
                | (BlockedAnomaly, Open)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PeriodState::Released
    }

    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            PeriodState::BlockedDiscrepancy | PeriodState::BlockedAnomaly
        )
    }

    /// Whether accrued/final amounts may still change.
    pub fn amounts_mutable(self) -> bool {
        matches!(self, PeriodState::Open | PeriodState::Closing)
    }
}

/// One (entity, tax type, period) remittance period.
///
/// Created OPEN on first accrual, mutated by reconciliation and release
/// dispatch, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub key: PeriodKey,
    pub state: PeriodState,
    /// Accounting basis the liability was computed on (e.g. "accrual").
    pub basis: String,
    pub accrued_cents: Cents,
    pub credited_cents: Cents,
    pub final_liability_cents: Cents,
    /// Merkle root over the period's ledger slice.
    pub merkle_root: String,
    /// Hash-chain tail of the period's ledger.
    pub running_balance_hash: String,
    pub anomaly: AnomalyVector,
    pub thresholds: AnomalyThresholds,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Period {
    /// A fresh OPEN period with empty chain state.
    pub fn open(key: PeriodKey, basis: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            state: PeriodState::Open,
            basis: basis.into(),
            accrued_cents: Cents::ZERO,
            credited_cents: Cents::ZERO,
            final_liability_cents: Cents::ZERO,
            merkle_root: String::new(),
            running_balance_hash: String::new(),
            anomaly: AnomalyVector::new(),
            thresholds: AnomalyThresholds::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, rejecting off-lattice transitions.
    pub fn transition(&mut self, to: PeriodState, now: DateTime<Utc>) -> Result<(), PeriodError> {
        if self.state == PeriodState::Released {
            return Err(PeriodError::Released);
        }
        if !self.state.can_transition(to) {
            return Err(PeriodError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Guard for amount mutation per the lattice invariant.
    pub fn ensure_amounts_mutable(&self) -> Result<(), PeriodError> {
        if self.state.amounts_mutable() {
            Ok(())
        } else {
            Err(PeriodError::AmountsFrozen(self.state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EntityId, PeriodId, TaxType};

    fn key() -> PeriodKey {
        PeriodKey::new(
            EntityId::new("12345678901").unwrap(),
            TaxType::WithheldTax,
            PeriodId::new("2025-09").unwrap(),
        )
    }

    #[test]
    fn test_happy_path_lattice() {
        let mut period = Period::open(key(), "accrual", Utc::now());
        let now = Utc::now();
        period.transition(PeriodState::Closing, now).unwrap();
        period.transition(PeriodState::ReadyRpt, now).unwrap();
        period.transition(PeriodState::Released, now).unwrap();
        assert!(period.state.is_terminal());
    }

    #[test]
    fn test_blocked_is_recoverable() {
        let mut period = Period::open(key(), "accrual", Utc::now());
        let now = Utc::now();
        period.transition(PeriodState::Closing, now).unwrap();
        period.transition(PeriodState::BlockedDiscrepancy, now).unwrap();
        period.transition(PeriodState::Closing, now).unwrap();
        period.transition(PeriodState::ReadyRpt, now).unwrap();
    }

    #[test]
    fn test_released_is_terminal() {
        let mut period = Period::open(key(), "accrual", Utc::now());
        let now = Utc::now();
        period.transition(PeriodState::Closing, now).unwrap();
        period.transition(PeriodState::ReadyRpt, now).unwrap();
        period.transition(PeriodState::Released, now).unwrap();
        let err = period.transition(PeriodState::Open, now).unwrap_err();
        assert_eq!(err, PeriodError::Released);
    }

    #[test]
    fn test_skipping_states_rejected() {
        let mut period = Period::open(key(), "accrual", Utc::now());
        let err = period
            .transition(PeriodState::Released, Utc::now())
            .unwrap_err();
        assert!(matches!(err, PeriodError::IllegalTransition { .. }));
    }

    #[test]
    fn test_amounts_frozen_after_ready() {
        let mut period = Period::open(key(), "accrual", Utc::now());
        assert!(period.ensure_amounts_mutable().is_ok());
        let now = Utc::now();
        period.transition(PeriodState::Closing, now).unwrap();
        assert!(period.ensure_amounts_mutable().is_ok());
        period.transition(PeriodState::ReadyRpt, now).unwrap();
        assert!(matches!(
            period.ensure_amounts_mutable(),
            Err(PeriodError::AmountsFrozen(PeriodState::ReadyRpt))
        ));
    }

    #[test]
    fn test_state_serde_screaming_snake() {
        let json = serde_json::to_string(&PeriodState::ReadyRpt).unwrap();
        assert_eq!(json, "\"READY_RPT\"");
        let parsed: PeriodState = serde_json::from_str("\"BLOCKED_DISCREPANCY\"").unwrap();
        assert_eq!(parsed, PeriodState::BlockedDiscrepancy);
    }
}
