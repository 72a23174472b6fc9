//! External event-source aggregates
//!
//! Payroll and point-of-sale pipelines are consumed only at this seam: they
//! deliver already-validated per-component totals keyed by entity and period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taxrail_core::{EntityId, PeriodId};
use thiserror::Error;

/// Errors from an upstream aggregate source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Source returned no data for component {0}")]
    MissingComponent(String),
}

/// Independently-sourced totals for one liability component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTotals {
    /// Component name, e.g. "withheld_tax" or "sales_tax".
    pub component: String,
    pub expected_cents: i64,
    pub reported_cents: i64,
    pub event_count: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Seam to the upstream event aggregates.
pub trait SourceAggregates: Send + Sync {
    /// Totals for every liability component of `(entity, period)`.
    fn component_totals(
        &self,
        entity_id: &EntityId,
        period_id: &PeriodId,
    ) -> Result<Vec<ComponentTotals>, SourceError>;
}
