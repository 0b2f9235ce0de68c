//! Selectively disclosed transactions.
//!
//! A [`FilteredTransaction`] carries the digest of every leaf plus the
//! content and nonce of the leaves its sender chose to reveal. A receiver
//! can prove the revealed content belongs to the transaction with the
//! stated id, and (through the signers group) can prove the sender did not
//! hide a command that needs the receiver's signature.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::types::{Command, TimeWindow};
use super::wire::{leaf_hash, root_from_leaves, Component, ComponentGroup};
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::Party;
use crate::ledger::{StateRef, TransactionState};

#[derive(Debug, Error)]
pub enum FilteredTransactionError {
    #[error("expected {expected} component groups, found {found}")]
    WrongGroupCount { expected: usize, found: usize },

    #[error("revealed {group:?}[{index}] is outside the group")]
    LeafOutOfRange { group: ComponentGroup, index: u32 },

    #[error("revealed {group:?}[{index}] does not match its leaf digest")]
    LeafMismatch { group: ComponentGroup, index: u32 },

    #[error("{group:?}[{index}] revealed twice")]
    DuplicateReveal { group: ComponentGroup, index: u32 },

    #[error("leaf digests do not fold to the stated id {0}")]
    RootMismatch(String),

    #[error("command {0} revealed without its signers")]
    CommandWithoutSigners(u32),

    /// The signers group was not fully revealed, so hidden commands cannot
    /// be ruled out.
    #[error("signers group is not fully visible")]
    SignersNotVisible,

    /// A hidden command requires the given key.
    #[error("command {index} requires {key} but is hidden")]
    HiddenCommand { index: u32, key: String },
}

/// A revealed leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedComponent {
    pub index: u32,
    pub nonce: [u8; 32],
    pub component: Component,
}

/// What predicates over a transaction see. Commands arrive with their
/// signers attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilteredElement {
    Input(StateRef),
    Output(TransactionState),
    Command(Command),
    Notary(Party),
    TimeWindow(TimeWindow),
    Reference(StateRef),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredTransaction {
    pub id: SecureHash,
    /// Digest of every leaf, per group, in id order.
    pub group_leaves: Vec<Vec<SecureHash>>,
    pub revealed: Vec<RevealedComponent>,
}

impl FilteredTransaction {
    /// Check that every revealed component is a genuine leaf of the
    /// transaction named by `id`.
    pub fn verify(&self) -> Result<(), FilteredTransactionError> {
        if self.group_leaves.len() != ComponentGroup::ALL.len() {
            return Err(FilteredTransactionError::WrongGroupCount {
                expected: ComponentGroup::ALL.len(),
                found: self.group_leaves.len(),
            });
        }

        let mut seen = BTreeSet::new();
        for rc in &self.revealed {
            let group = rc.component.group();
            if !seen.insert((group, rc.index)) {
                return Err(FilteredTransactionError::DuplicateReveal {
                    group,
                    index: rc.index,
                });
            }
            let expected = self.group_leaves[group.ordinal()]
                .get(rc.index as usize)
                .ok_or(FilteredTransactionError::LeafOutOfRange {
                    group,
                    index: rc.index,
                })?;
            if leaf_hash(&rc.nonce, &rc.component) != *expected {
                return Err(FilteredTransactionError::LeafMismatch {
                    group,
                    index: rc.index,
                });
            }
        }

        for (group, index) in &seen {
            if *group == ComponentGroup::Commands
                && !seen.contains(&(ComponentGroup::Signers, *index))
            {
                return Err(FilteredTransactionError::CommandWithoutSigners(*index));
            }
        }

        if root_from_leaves(&self.group_leaves) != self.id {
            return Err(FilteredTransactionError::RootMismatch(self.id.short()));
        }
        Ok(())
    }

    fn signers_at(&self, index: u32) -> Option<&Vec<PublicKey>> {
        self.revealed.iter().find_map(|rc| match &rc.component {
            Component::Signers(keys) if rc.index == index => Some(keys),
            _ => None,
        })
    }

    /// Revealed content, commands joined with their signers. The signers
    /// group itself is not an element.
    pub fn elements(&self) -> Vec<FilteredElement> {
        self.revealed
            .iter()
            .filter_map(|rc| match &rc.component {
                Component::Input(r) => Some(FilteredElement::Input(*r)),
                Component::Output(s) => Some(FilteredElement::Output(s.clone())),
                Component::Command(value) => Some(FilteredElement::Command(Command {
                    value: value.clone(),
                    signers: self.signers_at(rc.index).cloned().unwrap_or_default(),
                })),
                Component::Notary(p) => Some(FilteredElement::Notary(p.clone())),
                Component::TimeWindow(w) => Some(FilteredElement::TimeWindow(*w)),
                Component::Reference(r) => Some(FilteredElement::Reference(*r)),
                Component::Signers(_) => None,
            })
            .collect()
    }

    /// `true` when at least one element is revealed and `predicate` accepts
    /// every revealed element.
    pub fn check_with(&self, predicate: impl Fn(&FilteredElement) -> bool) -> bool {
        let elements = self.elements();
        !elements.is_empty() && elements.iter().all(predicate)
    }

    /// Require that every command needing `key` is revealed.
    ///
    /// The signers group must be fully visible for this to be decidable.
    pub fn check_command_visibility(&self, key: &PublicKey) -> Result<(), FilteredTransactionError> {
        let total = self
            .group_leaves
            .get(ComponentGroup::Signers.ordinal())
            .map_or(0, Vec::len);
        let visible_commands: BTreeSet<u32> = self
            .revealed
            .iter()
            .filter(|rc| rc.component.group() == ComponentGroup::Commands)
            .map(|rc| rc.index)
            .collect();

        for index in 0..total as u32 {
            let signers = self
                .signers_at(index)
                .ok_or(FilteredTransactionError::SignersNotVisible)?;
            if signers.contains(key) && !visible_commands.contains(&index) {
                return Err(FilteredTransactionError::HiddenCommand {
                    index,
                    key: key.short(),
                });
            }
        }
        Ok(())
    }

    pub fn commands(&self) -> Vec<Command> {
        self.elements()
            .into_iter()
            .filter_map(|e| match e {
                FilteredElement::Command(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn time_window(&self) -> Option<TimeWindow> {
        self.elements().into_iter().find_map(|e| match e {
            FilteredElement::TimeWindow(w) => Some(w),
            _ => None,
        })
    }
}
