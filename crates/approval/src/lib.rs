//! Taxrail approval - dual-approval gate
//!
//! High-value releases need two distinct human approvers. Approvals bind to
//! `digest(canonical(entity, tax type, period, amount))`, so changing the
//! amount silently invalidates everything already collected. Approvals age
//! out of the window after a configured TTL.

mod gate;

pub use gate::{release_hash, Approval, ApprovalConfig, ApprovalGate, ApprovalRole, ApprovalStats};

use taxrail_store::StoreError;
use thiserror::Error;

/// Errors from the approval gate
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] taxrail_audit::AuditError),

    #[error("Canonicalization error: {0}")]
    Canon(#[from] taxrail_core::CanonError),

    #[error("Approval reason is mandatory")]
    EmptyReason,

    #[error("Role {0} is not permitted to register approvals")]
    RoleNotPermitted(ApprovalRole),

    #[error("Approver {0} already approved this release")]
    DuplicateApprover(String),

    #[error("Dual approval unmet: have {have} distinct approver(s), need {need}")]
    Unmet { have: usize, need: usize },

    #[error("Approvals exist for a different amount; re-approve the current amount")]
    AmountChanged,
}

impl From<rusqlite::Error> for ApprovalError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}
