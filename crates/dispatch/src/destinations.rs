//! Allow-listed payout destinations
//!
//! An explicit structure built once at startup and passed by reference into
//! the dispatcher. There is no runtime registration path: a destination that
//! is not in the book does not exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use taxrail_core::{EntityId, Rail};

/// One payout destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub rail: Rail,
    /// Remittance reference the entity registered for this destination.
    pub reference: String,
    pub account_name: String,
    pub account_number: String,
}

/// Config shape: one allow-list row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationEntry {
    pub entity_id: EntityId,
    pub destination: Destination,
}

/// The allow-list, keyed by (entity, rail, reference).
#[derive(Debug, Clone, Default)]
pub struct DestinationBook {
    entries: BTreeMap<(String, Rail, String), Destination>,
}

impl DestinationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<DestinationEntry>) -> Self {
        let mut book = Self::new();
        for entry in entries {
            book.insert(&entry.entity_id, entry.destination);
        }
        book
    }

    pub fn insert(&mut self, entity_id: &EntityId, destination: Destination) {
        self.entries.insert(
            (
                entity_id.as_str().to_string(),
                destination.rail,
                destination.reference.clone(),
            ),
            destination,
        );
    }

    pub fn resolve(&self, entity_id: &EntityId, rail: Rail, reference: &str) -> Option<&Destination> {
        self.entries
            .get(&(entity_id.as_str().to_string(), rail, reference.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityId {
        EntityId::new("12345678901").unwrap()
    }

    fn destination() -> Destination {
        Destination {
            rail: Rail::Eft,
            reference: "SEPT".into(),
            account_name: "Tax Authority".into(),
            account_number: "0001-555-777".into(),
        }
    }

    #[test]
    fn test_resolve_registered() {
        let mut book = DestinationBook::new();
        book.insert(&entity(), destination());

        let found = book.resolve(&entity(), Rail::Eft, "SEPT").unwrap();
        assert_eq!(found.account_number, "0001-555-777");
    }

    #[test]
    fn test_resolve_misses_other_rail_or_reference() {
        let mut book = DestinationBook::new();
        book.insert(&entity(), destination());

        assert!(book.resolve(&entity(), Rail::Wire, "SEPT").is_none());
        assert!(book.resolve(&entity(), Rail::Eft, "OCT").is_none());
        assert!(book
            .resolve(&EntityId::new("999").unwrap(), Rail::Eft, "SEPT")
            .is_none());
    }

    #[test]
    fn test_from_entries() {
        let book = DestinationBook::from_entries(vec![DestinationEntry {
            entity_id: entity(),
            destination: destination(),
        }]);
        assert_eq!(book.len(), 1);
    }
}
