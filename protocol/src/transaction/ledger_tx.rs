//! Resolved transactions, the form contracts are verified against.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::types::{Command, CommandData, TimeWindow};
use super::verification::VerificationError;
use super::wire::WireTransaction;
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::Party;
use crate::ledger::{StateAndRef, StateKind, StateRef, TransactionState};
use crate::vault::VaultError;

/// Anything that can look up a state by reference.
pub trait StateLoader {
    fn load_state(&self, reference: &StateRef) -> Result<Option<TransactionState>, VaultError>;
}

/// A transaction with its inputs and references resolved to the states
/// they point at.
#[derive(Clone, Debug)]
pub struct LedgerTransaction {
    pub id: SecureHash,
    pub inputs: Vec<StateAndRef>,
    pub references: Vec<StateAndRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub notary: Party,
    pub time_window: Option<TimeWindow>,
}

impl LedgerTransaction {
    pub fn inputs_of<T: StateKind>(&self) -> Vec<&T> {
        self.inputs.iter().filter_map(|s| s.get::<T>()).collect()
    }

    pub fn references_of<T: StateKind>(&self) -> Vec<&T> {
        self.references.iter().filter_map(|s| s.get::<T>()).collect()
    }

    pub fn outputs_of<T: StateKind>(&self) -> Vec<&T> {
        self.outputs.iter().filter_map(|s| s.get::<T>()).collect()
    }

    /// Commands whose data satisfies `select`.
    pub fn commands_where(&self, select: impl Fn(&CommandData) -> bool) -> Vec<&Command> {
        self.commands.iter().filter(|c| select(&c.value)).collect()
    }

    /// Union of all command signers.
    pub fn command_signers(&self) -> BTreeSet<PublicKey> {
        self.commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .collect()
    }

    pub fn time_window_until(&self) -> Option<DateTime<Utc>> {
        self.time_window.and_then(|w| w.until)
    }

    pub fn time_window_from(&self) -> Option<DateTime<Utc>> {
        self.time_window.and_then(|w| w.from)
    }
}

impl WireTransaction {
    /// Resolve inputs and references, and enforce the rules that hold for
    /// every transaction regardless of contract.
    pub fn to_ledger_transaction(&self, loader: &dyn StateLoader) -> Result<LedgerTransaction, VerificationError> {
        let notary = self.notary.clone().ok_or(VerificationError::MissingNotary)?;
        if self.commands.is_empty() {
            return Err(VerificationError::NoCommands);
        }

        let mut seen = BTreeSet::new();
        for input in &self.inputs {
            if !seen.insert(*input) {
                return Err(VerificationError::DuplicateInput(*input));
            }
        }
        if let Some(both) = self.references.iter().find(|r| seen.contains(r)) {
            return Err(VerificationError::InputAlsoReference(*both));
        }

        let resolve = |refs: &[StateRef]| -> Result<Vec<StateAndRef>, VerificationError> {
            refs.iter()
                .map(|r| {
                    let state = loader
                        .load_state(r)?
                        .ok_or(VerificationError::MissingDependency(*r))?;
                    Ok(StateAndRef::new(state, *r))
                })
                .collect()
        };
        let inputs = resolve(&self.inputs)?;
        let references = resolve(&self.references)?;

        for sar in inputs.iter().chain(&references) {
            if sar.state.notary != notary {
                return Err(VerificationError::NotaryMismatch(sar.reference.to_string()));
            }
        }
        if let Some(index) = self.outputs.iter().position(|o| o.notary != notary) {
            return Err(VerificationError::NotaryMismatch(format!("output {}", index)));
        }

        Ok(LedgerTransaction {
            id: self.id(),
            inputs,
            references,
            outputs: self.outputs.clone(),
            commands: self.commands.clone(),
            notary,
            time_window: self.time_window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::ledger::{FungibleToken, IssuedTokenType, TokenType};
    use crate::transaction::types::TokenAction;
    use std::collections::HashMap;

    struct MapLoader(HashMap<StateRef, TransactionState>);

    impl StateLoader for MapLoader {
        fn load_state(&self, reference: &StateRef) -> Result<Option<TransactionState>, VaultError> {
            Ok(self.0.get(reference).cloned())
        }
    }

    fn fixture() -> (WireTransaction, MapLoader, StateRef) {
        let notary = Party::new("Notary", KeyPair::generate().public_key());
        let issuer = Party::new("Issuer", KeyPair::generate().public_key());
        let token = IssuedTokenType::new(issuer.clone(), TokenType::usd());
        let state = TransactionState::new(
            FungibleToken::new(token.clone(), issuer.anonymise(), 5),
            notary.clone(),
        );
        let input = StateRef::new(SecureHash::of(b"prev"), 0);
        let wtx = WireTransaction {
            inputs: vec![input],
            references: vec![],
            outputs: vec![state.clone()],
            commands: vec![Command::new(
                CommandData::token(TokenAction::Move, token),
                [issuer.owning_key],
            )],
            notary: Some(notary),
            time_window: None,
            privacy_salt: [0u8; 32],
        };
        let loader = MapLoader([(input, state)].into_iter().collect());
        (wtx, loader, input)
    }

    #[test]
    fn resolves_inputs_and_filters_by_kind() {
        let (wtx, loader, _) = fixture();
        let ltx = wtx.to_ledger_transaction(&loader).unwrap();
        assert_eq!(ltx.inputs_of::<FungibleToken>().len(), 1);
        assert_eq!(ltx.outputs_of::<FungibleToken>()[0].amount, 5);
    }

    #[test]
    fn unknown_input_is_a_missing_dependency() {
        let (wtx, _, input) = fixture();
        let empty = MapLoader(HashMap::new());
        assert!(matches!(
            wtx.to_ledger_transaction(&empty),
            Err(VerificationError::MissingDependency(r)) if r == input
        ));
    }

    #[test]
    fn duplicate_inputs_and_input_references_are_rejected() {
        let (mut wtx, loader, input) = fixture();
        wtx.inputs.push(input);
        assert!(matches!(
            wtx.to_ledger_transaction(&loader),
            Err(VerificationError::DuplicateInput(_))
        ));

        let (mut wtx, loader, input) = fixture();
        wtx.references.push(input);
        assert!(matches!(
            wtx.to_ledger_transaction(&loader),
            Err(VerificationError::InputAlsoReference(_))
        ));
    }

    #[test]
    fn foreign_notary_is_rejected() {
        let (mut wtx, loader, _) = fixture();
        wtx.notary = Some(Party::new("Other", KeyPair::generate().public_key()));
        assert!(matches!(
            wtx.to_ledger_transaction(&loader),
            Err(VerificationError::NotaryMismatch(_))
        ));
    }
}
