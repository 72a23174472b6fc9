//! Taxrail core - domain types shared by every component
//!
//! # Key Types
//! - `Cents`: non-negative minor-unit amount, enforced at the type level
//! - `EntityId` / `TaxType` / `PeriodId` / `PeriodKey`: validated identifiers
//! - `Period` / `PeriodState`: the remittance period and its state lattice
//! - `hash`: content digests, hash chains and Merkle roots - the trust anchor
//! - `canon`: canonical JSON for everything that gets hashed or signed

pub mod canon;
pub mod hash;
pub mod ids;
pub mod period;
pub mod units;

pub use canon::{canonical_json, to_canonical_json, CanonError};
pub use hash::{digest, merkle_root, MerkleProof, ProofStep};
pub use ids::{EntityId, IdError, PeriodId, PeriodKey, Rail, TaxType};
pub use period::{AnomalyThresholds, AnomalyVector, Period, PeriodError, PeriodState};
pub use units::{Cents, UnitsError};
