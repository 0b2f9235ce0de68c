//! The canonical, unsigned form of a transaction and how its id is derived.
//!
//! A transaction's id is a Merkle root over its components, not a hash of
//! one serialised blob. That is what makes selective disclosure possible:
//! a party can reveal some components, hand over only the digests of the
//! rest, and the receiver can still recompute the same id.
//!
//! ```text
//!                             id
//!            ┌──────────────────┴──────────────────┐
//!   root(inputs) root(outputs) root(commands) ... root(signers)
//!        │             │             │                  │
//!   H(n₀‖c₀) …    H(n₀‖c₀) …    H(n₀‖c₀) …         H(n₀‖c₀) …
//! ```
//!
//! Each leaf is salted with a nonce derived from the transaction's privacy
//! salt, the group and the index, so a hidden component cannot be
//! recovered by guessing its content and hashing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::filtered::{FilteredElement, FilteredTransaction, RevealedComponent};
use super::types::{Command, CommandData, TimeWindow};
use crate::crypto::{blake3_hash_multi, domain_separated_hash, merkle_root, PublicKey, SecureHash};
use crate::identity::Party;
use crate::ledger::{StateRef, TransactionState};

const NONCE_CONTEXT: &str = "accord 2026 component nonce v1";

/// Component groups, in id order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentGroup {
    Inputs,
    Outputs,
    Commands,
    Notary,
    TimeWindow,
    References,
    /// One leaf per command: that command's required signers.
    Signers,
}

impl ComponentGroup {
    pub const ALL: [ComponentGroup; 7] = [
        ComponentGroup::Inputs,
        ComponentGroup::Outputs,
        ComponentGroup::Commands,
        ComponentGroup::Notary,
        ComponentGroup::TimeWindow,
        ComponentGroup::References,
        ComponentGroup::Signers,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }
}

/// One leaf's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    Input(StateRef),
    Output(TransactionState),
    Command(CommandData),
    Notary(Party),
    TimeWindow(TimeWindow),
    Reference(StateRef),
    Signers(Vec<PublicKey>),
}

impl Component {
    pub fn group(&self) -> ComponentGroup {
        match self {
            Component::Input(_) => ComponentGroup::Inputs,
            Component::Output(_) => ComponentGroup::Outputs,
            Component::Command(_) => ComponentGroup::Commands,
            Component::Notary(_) => ComponentGroup::Notary,
            Component::TimeWindow(_) => ComponentGroup::TimeWindow,
            Component::Reference(_) => ComponentGroup::References,
            Component::Signers(_) => ComponentGroup::Signers,
        }
    }

    fn encode(&self) -> Vec<u8> {
        // bincode only fails on sequences of unknown length, which derived
        // serde impls never produce.
        bincode::serialize(self).unwrap_or_default()
    }
}

/// Salted leaf digest of one component.
pub(crate) fn leaf_hash(nonce: &[u8; 32], component: &Component) -> SecureHash {
    SecureHash::new(blake3_hash_multi(&[nonce.as_slice(), &component.encode()]))
}

/// Fold per-group leaf digests into the transaction id.
pub(crate) fn root_from_leaves(groups: &[Vec<SecureHash>]) -> SecureHash {
    let group_roots: Vec<[u8; 32]> = groups
        .iter()
        .map(|leaves| {
            let raw: Vec<[u8; 32]> = leaves.iter().map(|h| *h.as_bytes()).collect();
            merkle_root(&raw)
        })
        .collect();
    SecureHash::new(merkle_root(&group_roots))
}

/// An unsigned transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub inputs: Vec<StateRef>,
    pub references: Vec<StateRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub notary: Option<Party>,
    pub time_window: Option<TimeWindow>,
    pub privacy_salt: [u8; 32],
}

impl WireTransaction {
    fn nonce(&self, group: ComponentGroup, index: usize) -> [u8; 32] {
        let mut material = Vec::with_capacity(32 + 1 + 8);
        material.extend_from_slice(&self.privacy_salt);
        material.push(group.ordinal() as u8);
        material.extend_from_slice(&(index as u64).to_be_bytes());
        domain_separated_hash(NONCE_CONTEXT, &material)
    }

    /// All components, grouped and ordered as they enter the id.
    pub fn components(&self) -> Vec<Vec<Component>> {
        ComponentGroup::ALL
            .iter()
            .map(|group| match group {
                ComponentGroup::Inputs => self.inputs.iter().copied().map(Component::Input).collect(),
                ComponentGroup::Outputs => self.outputs.iter().cloned().map(Component::Output).collect(),
                ComponentGroup::Commands => self
                    .commands
                    .iter()
                    .map(|c| Component::Command(c.value.clone()))
                    .collect(),
                ComponentGroup::Notary => self.notary.iter().cloned().map(Component::Notary).collect(),
                ComponentGroup::TimeWindow => {
                    self.time_window.iter().copied().map(Component::TimeWindow).collect()
                }
                ComponentGroup::References => {
                    self.references.iter().copied().map(Component::Reference).collect()
                }
                ComponentGroup::Signers => self
                    .commands
                    .iter()
                    .map(|c| Component::Signers(c.signers.clone()))
                    .collect(),
            })
            .collect()
    }

    fn group_leaves(&self, components: &[Vec<Component>]) -> Vec<Vec<SecureHash>> {
        ComponentGroup::ALL
            .iter()
            .zip(components)
            .map(|(group, comps)| {
                comps
                    .iter()
                    .enumerate()
                    .map(|(i, c)| leaf_hash(&self.nonce(*group, i), c))
                    .collect()
            })
            .collect()
    }

    /// The transaction id: Merkle root over the group roots.
    pub fn id(&self) -> SecureHash {
        root_from_leaves(&self.group_leaves(&self.components()))
    }

    /// Reference to output `index` of this transaction.
    pub fn out_ref(&self, index: usize) -> StateRef {
        StateRef::new(self.id(), index as u32)
    }

    /// Every command signer plus the notary.
    pub fn required_signing_keys(&self) -> BTreeSet<PublicKey> {
        let mut keys: BTreeSet<PublicKey> = self
            .commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .collect();
        if let Some(notary) = &self.notary {
            keys.insert(notary.owning_key);
        }
        keys
    }

    /// Build a view revealing only the components `reveal` selects.
    ///
    /// Commands are offered to the predicate together with their signers.
    /// When any command is revealed the whole signers group goes with it,
    /// so the receiver can tell which hidden commands require which keys.
    pub fn build_filtered_transaction(
        &self,
        reveal: impl Fn(&FilteredElement) -> bool,
    ) -> FilteredTransaction {
        let components = self.components();
        let group_leaves = self.group_leaves(&components);
        let mut revealed = Vec::new();
        let mut any_command = false;

        for (group, comps) in ComponentGroup::ALL.iter().zip(&components) {
            if *group == ComponentGroup::Signers {
                continue;
            }
            for (index, component) in comps.iter().enumerate() {
                let element = match component {
                    Component::Input(r) => FilteredElement::Input(*r),
                    Component::Output(s) => FilteredElement::Output(s.clone()),
                    Component::Command(_) => FilteredElement::Command(self.commands[index].clone()),
                    Component::Notary(p) => FilteredElement::Notary(p.clone()),
                    Component::TimeWindow(w) => FilteredElement::TimeWindow(*w),
                    Component::Reference(r) => FilteredElement::Reference(*r),
                    Component::Signers(_) => continue,
                };
                if reveal(&element) {
                    any_command |= *group == ComponentGroup::Commands;
                    revealed.push(RevealedComponent {
                        index: index as u32,
                        nonce: self.nonce(*group, index),
                        component: component.clone(),
                    });
                }
            }
        }

        if any_command {
            let signers = &components[ComponentGroup::Signers.ordinal()];
            for (index, component) in signers.iter().enumerate() {
                revealed.push(RevealedComponent {
                    index: index as u32,
                    nonce: self.nonce(ComponentGroup::Signers, index),
                    component: component.clone(),
                });
            }
        }

        FilteredTransaction {
            id: root_from_leaves(&group_leaves),
            group_leaves,
            revealed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::ledger::{FungibleToken, IssuedTokenType, TokenType};
    use crate::transaction::types::TokenAction;

    fn sample() -> WireTransaction {
        let notary = Party::new("Notary", KeyPair::generate().public_key());
        let issuer = Party::new("Issuer", KeyPair::generate().public_key());
        let token = IssuedTokenType::new(issuer.clone(), TokenType::usd());
        let out = FungibleToken::new(token.clone(), issuer.anonymise(), 100);
        WireTransaction {
            inputs: vec![],
            references: vec![],
            outputs: vec![TransactionState::new(out, notary.clone())],
            commands: vec![Command::new(
                CommandData::token(TokenAction::Issue, token),
                [issuer.owning_key],
            )],
            notary: Some(notary),
            time_window: None,
            privacy_salt: [3u8; 32],
        }
    }

    #[test]
    fn id_is_deterministic() {
        let tx = sample();
        assert_eq!(tx.id(), tx.clone().id());
    }

    #[test]
    fn id_depends_on_salt_and_content() {
        let tx = sample();
        let mut salted = tx.clone();
        salted.privacy_salt = [4u8; 32];
        assert_ne!(tx.id(), salted.id());

        let mut changed = tx.clone();
        changed.commands[0].signers.clear();
        assert_ne!(tx.id(), changed.id());
    }

    #[test]
    fn required_keys_include_notary() {
        let tx = sample();
        let keys = tx.required_signing_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&tx.notary.as_ref().unwrap().owning_key));
    }

    #[test]
    fn filtered_view_keeps_the_id() {
        let tx = sample();
        let ftx = tx.build_filtered_transaction(|e| matches!(e, FilteredElement::Command(_)));
        assert_eq!(ftx.id, tx.id());
        // One command plus its signers leaf.
        assert_eq!(ftx.revealed.len(), 2);
    }
}
