//! The attester's table of subject statuses.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::ledger::{DiligenceStatus, LinearId};

/// Known statuses keyed by subject. Only `Linked` subjects are stored; an
/// absent subject reads as `Clear`.
#[derive(Debug, Default)]
pub struct FactStore {
    facts: RwLock<HashMap<LinearId, DiligenceStatus>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &LinearId) -> DiligenceStatus {
        self.facts
            .read()
            .get(subject)
            .copied()
            .unwrap_or(DiligenceStatus::Clear)
    }

    pub fn set(&self, subject: LinearId, status: DiligenceStatus) {
        let mut facts = self.facts.write();
        match status {
            DiligenceStatus::Clear => {
                facts.remove(&subject);
            }
            linked => {
                facts.insert(subject, linked);
            }
        }
    }

    /// Number of subjects with a non-default status.
    pub fn len(&self) -> usize {
        self.facts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.read().is_empty()
    }
}
