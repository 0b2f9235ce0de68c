//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] is the only mutable stage of a transaction's
//! life. It collects inputs, reference inputs, outputs, directives and a
//! validity window, verifies the result locally, and produces the first
//! [`SignedTransaction`]. After that nothing but signatures can change.
//!
//! Building and verifying touch nothing outside the builder itself.

use rand::RngCore;
use std::collections::{BTreeSet, HashMap};

use super::ledger_tx::{LedgerTransaction, StateLoader};
use super::signed::SignedTransaction;
use super::types::{Command, CommandData, TimeWindow};
use super::verification::{ContractVerifier, VerificationError};
use super::wire::WireTransaction;
use crate::crypto::{KeyError, PublicKey};
use crate::identity::{KeyManager, Party};
use crate::ledger::{ContractState, StateAndRef, StateRef, TransactionState};
use crate::vault::VaultError;

/// Fluent builder for a [`WireTransaction`].
///
/// Inputs and references are added as full [`StateAndRef`]s so the builder
/// can verify without a store.
///
/// ```ignore
/// let stx = TransactionBuilder::new(notary)
///     .add_input_state(proposal)
///     .add_command(CommandData::Proposal(ProposalCommand::Accept), [buyer_key])
///     .set_time_window(TimeWindow::until_only(deadline))
///     .sign_initial(&keys, &[buyer_key])?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    notary: Party,
    inputs: Vec<StateAndRef>,
    references: Vec<StateAndRef>,
    outputs: Vec<TransactionState>,
    commands: Vec<Command>,
    time_window: Option<TimeWindow>,
    privacy_salt: [u8; 32],
}

impl TransactionBuilder {
    /// Start a transaction ordered by `notary`. The privacy salt is drawn
    /// here, so repeated calls to [`to_wire_transaction`](Self::to_wire_transaction)
    /// yield the same id.
    pub fn new(notary: Party) -> Self {
        let mut privacy_salt = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut privacy_salt);
        Self {
            notary,
            inputs: Vec::new(),
            references: Vec::new(),
            outputs: Vec::new(),
            commands: Vec::new(),
            time_window: None,
            privacy_salt,
        }
    }

    pub fn notary(&self) -> &Party {
        &self.notary
    }

    pub fn add_input_state(mut self, state: StateAndRef) -> Self {
        self.inputs.push(state);
        self
    }

    pub fn add_input_states(mut self, states: impl IntoIterator<Item = StateAndRef>) -> Self {
        self.inputs.extend(states);
        self
    }

    /// Add a state that must be current but is not consumed.
    pub fn add_reference_state(mut self, state: StateAndRef) -> Self {
        self.references.push(state);
        self
    }

    /// Add an output governed by this builder's notary.
    pub fn add_output_state(mut self, data: impl Into<ContractState>) -> Self {
        self.outputs
            .push(TransactionState::new(data.into(), self.notary.clone()));
        self
    }

    pub fn add_output_states<S: Into<ContractState>>(mut self, data: impl IntoIterator<Item = S>) -> Self {
        for d in data {
            self.outputs
                .push(TransactionState::new(d.into(), self.notary.clone()));
        }
        self
    }

    pub fn add_command(mut self, value: CommandData, signers: impl IntoIterator<Item = PublicKey>) -> Self {
        self.commands.push(Command::new(value, signers));
        self
    }

    /// Replace any previously set window.
    pub fn set_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn inputs(&self) -> &[StateAndRef] {
        &self.inputs
    }

    pub fn references(&self) -> &[StateAndRef] {
        &self.references
    }

    pub fn outputs(&self) -> &[TransactionState] {
        &self.outputs
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn time_window(&self) -> Option<TimeWindow> {
        self.time_window
    }

    pub fn to_wire_transaction(&self) -> WireTransaction {
        WireTransaction {
            inputs: self.inputs.iter().map(|s| s.reference).collect(),
            references: self.references.iter().map(|s| s.reference).collect(),
            outputs: self.outputs.clone(),
            commands: self.commands.clone(),
            notary: Some(self.notary.clone()),
            time_window: self.time_window,
            privacy_salt: self.privacy_salt,
        }
    }

    pub fn to_ledger_transaction(&self) -> Result<LedgerTransaction, VerificationError> {
        self.to_wire_transaction().to_ledger_transaction(self)
    }

    /// Resolve and run the contract verifier. Fails closed.
    pub fn verify(&self, verifier: &dyn ContractVerifier) -> Result<LedgerTransaction, VerificationError> {
        let ltx = self.to_ledger_transaction()?;
        verifier.verify(&ltx)?;
        Ok(ltx)
    }

    /// Freeze the transaction and sign it with `signing_keys`.
    pub fn sign_initial(&self, keys: &KeyManager, signing_keys: &[PublicKey]) -> Result<SignedTransaction, KeyError> {
        let wtx = self.to_wire_transaction();
        let id = wtx.id();
        let unique: BTreeSet<&PublicKey> = signing_keys.iter().collect();
        let sigs = unique
            .into_iter()
            .map(|k| keys.sign(k, &id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SignedTransaction::new(wtx, sigs))
    }
}

impl StateLoader for TransactionBuilder {
    fn load_state(&self, reference: &StateRef) -> Result<Option<TransactionState>, VaultError> {
        let known: HashMap<&StateRef, &TransactionState> = self
            .inputs
            .iter()
            .chain(&self.references)
            .map(|s| (&s.reference, &s.state))
            .collect();
        Ok(known.get(reference).map(|s| (*s).clone()))
    }
}
