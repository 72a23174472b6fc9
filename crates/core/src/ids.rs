//! Validated identifiers for entities, tax types, periods and rails
//!
//! Every key that reaches storage is parsed up front; malformed input is a
//! validation error before any state change.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Errors from identifier validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Entity id cannot be empty")]
    EmptyEntityId,

    #[error("Entity id contains invalid characters: {0}")]
    InvalidEntityId(String),

    #[error("Unknown tax type: {0}")]
    UnknownTaxType(String),

    #[error("Period id must be YYYY-MM, got: {0}")]
    InvalidPeriodId(String),

    #[error("Unknown rail: {0}")]
    UnknownRail(String),
}

/// Remitting entity identifier (e.g. an 11-digit organization number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdError::EmptyEntityId);
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(IdError::InvalidEntityId(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Liability component this system remits.
///
/// Unknown tax types are a validation error, not an open-ended string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaxType {
    WithheldTax,
    SalesTax,
}

impl TaxType {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        value
            .parse()
            .map_err(|_| IdError::UnknownTaxType(value.to_string()))
    }
}

/// Reporting period in `YYYY-MM` form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodId(String);

impl PeriodId {
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        let bytes = value.as_bytes();
        let well_formed = bytes.len() == 7
            && bytes[..4].iter().all(|b| b.is_ascii_digit())
            && bytes[4] == b'-'
            && bytes[5..].iter().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err(IdError::InvalidPeriodId(value));
        }
        let month: u8 = value[5..].parse().map_err(|_| IdError::InvalidPeriodId(value.clone()))?;
        if !(1..=12).contains(&month) {
            return Err(IdError::InvalidPeriodId(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PeriodId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeriodId> for String {
    fn from(id: PeriodId) -> Self {
        id.0
    }
}

/// Composite key identifying one remittance period.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    pub entity_id: EntityId,
    pub tax_type: TaxType,
    pub period_id: PeriodId,
}

impl PeriodKey {
    pub fn new(entity_id: EntityId, tax_type: TaxType, period_id: PeriodId) -> Self {
        Self {
            entity_id,
            tax_type,
            period_id,
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity_id, self.tax_type, self.period_id)
    }
}

/// Bank rail a release can be dispatched on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Rail {
    Eft,
    Ach,
    Wire,
}

impl Rail {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        value
            .parse()
            .map_err(|_| IdError::UnknownRail(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_rejects_empty() {
        assert!(matches!(EntityId::new(""), Err(IdError::EmptyEntityId)));
    }

    #[test]
    fn test_entity_id_accepts_org_number() {
        let id = EntityId::new("12345678901").unwrap();
        assert_eq!(id.as_str(), "12345678901");
    }

    #[test]
    fn test_entity_id_rejects_whitespace() {
        assert!(EntityId::new("123 456").is_err());
    }

    #[test]
    fn test_period_id_accepts_valid() {
        let id = PeriodId::new("2025-09").unwrap();
        assert_eq!(id.as_str(), "2025-09");
    }

    #[test]
    fn test_period_id_rejects_malformed() {
        for bad in ["2025-13", "2025-00", "202509", "2025-9", "25-09", "2025/09"] {
            assert!(PeriodId::new(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_tax_type_parse() {
        assert_eq!(TaxType::parse("withheld_tax").unwrap(), TaxType::WithheldTax);
        assert_eq!(TaxType::parse("sales_tax").unwrap(), TaxType::SalesTax);
        assert!(TaxType::parse("carbon_tax").is_err());
    }

    #[test]
    fn test_rail_parse_uppercase() {
        assert_eq!(Rail::parse("EFT").unwrap(), Rail::Eft);
        assert_eq!(Rail::Eft.to_string(), "EFT");
        assert!(Rail::parse("PIGEON").is_err());
    }

    #[test]
    fn test_period_key_display() {
        let key = PeriodKey::new(
            EntityId::new("12345678901").unwrap(),
            TaxType::WithheldTax,
            PeriodId::new("2025-09").unwrap(),
        );
        assert_eq!(key.to_string(), "12345678901/withheld_tax/2025-09");
    }
}
