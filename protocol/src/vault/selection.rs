//! # Coin Selection
//!
//! Assembles a set of fungible holdings whose total covers a target.
//!
//! ```text
//!   vault page 1 ──filter──▶ plus, plus, plus ─┐
//!   vault page 2 ──filter──▶ plus, ...         ├─▶ sum >= target? stop
//!   ...                                        ┘
//! ```
//!
//! Selection reserves nothing. Two concurrent selections on the same node
//! may pick the same holding; the notary lets one of them through and the
//! loser restarts with a fresh selection.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::store::{PageSpecification, QueryCriteria, Vault, VaultError};
use crate::config::DEFAULT_SELECTION_PAGE_SIZE;
use crate::crypto::PublicKey;
use crate::identity::AbstractParty;
use crate::ledger::{FungibleToken, IssuedTokenType, StateAndRef, StateRef, StateType, TokenType};

#[derive(Debug, Error)]
pub enum SelectionError {
    /// The vault ran out of matching holdings before the target was met.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("amount overflow while summing holdings")]
    Overflow,

    /// `minus` was asked to remove a holding that was never selected.
    #[error("state {0} is not part of the selection")]
    NotSelected(StateRef),

    #[error("state {0} is not a fungible token")]
    NotFungible(StateRef),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
}

// ---------------------------------------------------------------------------
// SelectionAccumulator
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Entry {
    state: StateAndRef,
    amount: u64,
}

/// A persistent running selection.
///
/// Cloning is cheap: entries live behind an `Arc` and are copied only when
/// a shared accumulator is modified. Every operation returns a new value
/// and leaves `self` untouched.
#[derive(Clone, Debug)]
pub struct SelectionAccumulator {
    target: u64,
    entries: Arc<Vec<Entry>>,
    sum: u64,
}

impl SelectionAccumulator {
    pub fn new(target: u64) -> Self {
        Self {
            target,
            entries: Arc::new(Vec::new()),
            sum: 0,
        }
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn is_satisfied(&self) -> bool {
        self.sum >= self.target
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn states(&self) -> Vec<StateAndRef> {
        self.entries.iter().map(|e| e.state.clone()).collect()
    }

    fn contains(&self, reference: &StateRef) -> bool {
        self.entries.iter().any(|e| e.state.reference == *reference)
    }

    /// Add a holding, unless the target is already met.
    ///
    /// Zero-amount holdings are accepted like any other.
    pub fn plus(&self, state: StateAndRef) -> Result<Self, SelectionError> {
        if self.is_satisfied() {
            return Ok(self.clone());
        }
        let amount = state
            .get::<FungibleToken>()
            .ok_or(SelectionError::NotFungible(state.reference))?
            .amount;
        let sum = self.sum.checked_add(amount).ok_or(SelectionError::Overflow)?;
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).push(Entry { state, amount });
        next.sum = sum;
        Ok(next)
    }

    /// Remove a previously selected holding.
    pub fn minus(&self, reference: &StateRef) -> Result<Self, SelectionError> {
        let position = self
            .entries
            .iter()
            .position(|e| e.state.reference == *reference)
            .ok_or(SelectionError::NotSelected(*reference))?;
        let mut next = self.clone();
        let removed = Arc::make_mut(&mut next.entries).remove(position);
        next.sum = self.sum.checked_sub(removed.amount).ok_or(SelectionError::Overflow)?;
        Ok(next)
    }

    /// Merge another accumulator into this one.
    ///
    /// `other`'s holdings are added in their own order with [`plus`](Self::plus),
    /// skipping any already present, so the result depends only on the two
    /// inputs and stops growing once this accumulator's target is met.
    pub fn join(&self, other: &SelectionAccumulator) -> Result<Self, SelectionError> {
        other.entries.iter().try_fold(self.clone(), |acc, entry| {
            if acc.contains(&entry.state.reference) {
                Ok(acc)
            } else {
                acc.plus(entry.state.clone())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// TokenSelection
// ---------------------------------------------------------------------------

/// What a selection may draw from.
#[derive(Clone, Debug)]
pub struct SelectionCriteria {
    pub token_type: TokenType,
    pub issuer: Option<PublicKey>,
    pub holder: Option<PublicKey>,
    /// Only holdings under a key the vault's key manager holds.
    pub ours_only: bool,
}

impl SelectionCriteria {
    pub fn new(token_type: TokenType) -> Self {
        Self {
            token_type,
            issuer: None,
            holder: None,
            ours_only: false,
        }
    }

    /// Draw from every key this node holds, fresh keys included.
    pub fn held_by_us(mut self) -> Self {
        self.ours_only = true;
        self
    }

    pub fn issued_by(mut self, issuer: PublicKey) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn held_by(mut self, holder: PublicKey) -> Self {
        self.holder = Some(holder);
        self
    }

    fn admits(&self, token: &FungibleToken, vault: &Vault) -> bool {
        self.issuer.map_or(true, |k| token.issued.issuer.owning_key == k)
            && self.holder.map_or(true, |k| token.holder.owning_key == k)
            && (!self.ours_only || vault.is_ours(&token.holder.owning_key))
    }
}

/// Inputs and outputs for a token move, change included.
#[derive(Clone, Debug)]
pub struct GeneratedMove {
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<FungibleToken>,
}

/// Pages through a vault to cover an amount.
pub struct TokenSelection<'a> {
    vault: &'a Vault,
    page_size: usize,
}

impl<'a> TokenSelection<'a> {
    pub fn new(vault: &'a Vault) -> Self {
        Self {
            vault,
            page_size: DEFAULT_SELECTION_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Cover `target` with unconsumed holdings matching `criteria`.
    ///
    /// Pages are read only until the target is met. Within a page,
    /// holdings are taken in vault order.
    pub fn select(&self, target: u64, criteria: &SelectionCriteria) -> Result<SelectionAccumulator, SelectionError> {
        let query = QueryCriteria::unconsumed()
            .of_type(StateType::Fungible)
            .token_type(criteria.token_type.clone());
        let mut acc = SelectionAccumulator::new(target);
        let mut page_number = 1;

        while !acc.is_satisfied() {
            let page = self
                .vault
                .query(&query, PageSpecification::new(page_number, self.page_size))?;
            if page.states.is_empty() {
                return Err(SelectionError::InsufficientFunds {
                    requested: target,
                    available: acc.sum(),
                });
            }
            for state in page.states {
                let admitted = state.get::<FungibleToken>().is_some_and(|t| criteria.admits(t, self.vault));
                if admitted {
                    acc = acc.plus(state)?;
                }
            }
            page_number += 1;
        }

        debug!(
            target,
            covered = acc.sum(),
            selected = acc.len(),
            pages = page_number - 1,
            "coin selection complete"
        );
        Ok(acc)
    }

    /// Select holdings for `recipients` and lay out the outputs.
    ///
    /// Amounts are drawn from each issuer's holdings in selection order.
    /// Whatever an issuer's holdings cover beyond what was paid out goes
    /// back to `change_holder` as one change output per issuer.
    pub fn generate_move(
        &self,
        recipients: &[(AbstractParty, u64)],
        change_holder: AbstractParty,
        criteria: &SelectionCriteria,
    ) -> Result<GeneratedMove, SelectionError> {
        let total = recipients
            .iter()
            .try_fold(0u64, |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or(SelectionError::Overflow)?;
        let selected = self.select(total, criteria)?;

        // Per-issuer buckets in first-seen order.
        let mut order: Vec<IssuedTokenType> = Vec::new();
        let mut available: BTreeMap<IssuedTokenType, u64> = BTreeMap::new();
        for entry in selected.entries.iter() {
            let Some(token) = entry.state.get::<FungibleToken>() else {
                continue;
            };
            let slot = available.entry(token.issued.clone()).or_insert_with(|| {
                order.push(token.issued.clone());
                0
            });
            *slot = slot.checked_add(entry.amount).ok_or(SelectionError::Overflow)?;
        }

        let mut outputs = Vec::new();
        let mut buckets = order.iter();
        let mut current = buckets.next();
        for (holder, amount) in recipients {
            let mut owed = *amount;
            while owed > 0 {
                let Some(issued) = current else {
                    // `select` covered the total, so buckets cannot run dry first.
                    return Err(SelectionError::InsufficientFunds {
                        requested: total,
                        available: selected.sum(),
                    });
                };
                let left = available.get_mut(issued).ok_or(SelectionError::Overflow)?;
                let take = owed.min(*left);
                if take > 0 {
                    outputs.push(FungibleToken::new(issued.clone(), *holder, take));
                    *left -= take;
                    owed -= take;
                }
                if *left == 0 {
                    current = buckets.next();
                }
            }
        }

        for issued in &order {
            let left = available.get(issued).copied().unwrap_or(0);
            if left > 0 {
                outputs.push(FungibleToken::new(issued.clone(), change_holder, left));
            }
        }

        Ok(GeneratedMove {
            inputs: selected.states(),
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecureHash};
    use crate::identity::{KeyManager, Party};
    use crate::ledger::TransactionState;
    use crate::transaction::{Command, CommandData, SignedTransaction, TokenAction, WireTransaction};
    use crate::vault::StatesToRecord;

    fn notary() -> Party {
        Party::new("Notary", KeyPair::generate().public_key())
    }

    fn holding(issued: &IssuedTokenType, holder: PublicKey, amount: u64, n: u32) -> StateAndRef {
        StateAndRef::new(
            TransactionState::new(FungibleToken::new(issued.clone(), holder.into(), amount), notary()),
            StateRef::new(SecureHash::of(&n.to_be_bytes()), n),
        )
    }

    fn usd(name: &str) -> IssuedTokenType {
        IssuedTokenType::new(Party::new(name, KeyPair::generate().public_key()), TokenType::usd())
    }

    fn seed(vault: &Vault, issued: &IssuedTokenType, holder: PublicKey, amounts: &[u64]) {
        let notary = notary();
        let wtx = WireTransaction {
            inputs: vec![],
            references: vec![],
            outputs: amounts
                .iter()
                .map(|a| TransactionState::new(FungibleToken::new(issued.clone(), holder.into(), *a), notary.clone()))
                .collect(),
            commands: vec![Command::new(
                CommandData::token(TokenAction::Issue, issued.clone()),
                [issued.issuer.owning_key],
            )],
            notary: Some(notary),
            time_window: None,
            privacy_salt: rand::random(),
        };
        vault
            .record_transactions(StatesToRecord::OnlyRelevant, &[SignedTransaction::new(wtx, vec![])])
            .unwrap();
    }

    fn vault_with_key() -> (Vault, PublicKey) {
        let keys = Arc::new(KeyManager::new());
        let me = keys.fresh_key();
        (Vault::open_temporary(keys).unwrap(), me)
    }

    #[test]
    fn plus_is_a_noop_once_target_is_met() {
        let issued = usd("Bank");
        let me = KeyPair::generate().public_key();
        let acc = SelectionAccumulator::new(10)
            .plus(holding(&issued, me, 10, 1))
            .unwrap()
            .plus(holding(&issued, me, 7, 2))
            .unwrap();
        assert_eq!(acc.sum(), 10);
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn accumulator_values_are_persistent() {
        let issued = usd("Bank");
        let me = KeyPair::generate().public_key();
        let base = SelectionAccumulator::new(100).plus(holding(&issued, me, 5, 1)).unwrap();
        let grown = base.plus(holding(&issued, me, 6, 2)).unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(grown.len(), 2);

        let shrunk = grown.minus(&grown.states()[0].reference).unwrap();
        assert_eq!(shrunk.sum(), 6);
        assert_eq!(grown.sum(), 11);
    }

    #[test]
    fn minus_of_unknown_state_fails() {
        let issued = usd("Bank");
        let me = KeyPair::generate().public_key();
        let acc = SelectionAccumulator::new(10);
        let missing = holding(&issued, me, 1, 9).reference;
        assert!(matches!(acc.minus(&missing), Err(SelectionError::NotSelected(r)) if r == missing));
    }

    #[test]
    fn overflow_is_detected() {
        let issued = usd("Bank");
        let me = KeyPair::generate().public_key();
        let acc = SelectionAccumulator::new(u64::MAX).plus(holding(&issued, me, u64::MAX - 1, 1)).unwrap();
        assert!(matches!(acc.plus(holding(&issued, me, 2, 2)), Err(SelectionError::Overflow)));
    }

    #[test]
    fn join_is_deterministic_and_skips_duplicates() {
        let issued = usd("Bank");
        let me = KeyPair::generate().public_key();
        let a = holding(&issued, me, 4, 1);
        let b = holding(&issued, me, 5, 2);
        let c = holding(&issued, me, 6, 3);

        let left = SelectionAccumulator::new(12).plus(a.clone()).unwrap();
        let right = SelectionAccumulator::new(12)
            .plus(a)
            .unwrap()
            .plus(b)
            .unwrap()
            .plus(c)
            .unwrap();
        let joined = left.join(&right).unwrap();
        assert_eq!(joined.sum(), 15);
        let amounts: Vec<u64> = joined
            .states()
            .iter()
            .map(|s| s.get::<FungibleToken>().unwrap().amount)
            .collect();
        assert_eq!(amounts, vec![4, 5, 6]);
        assert_eq!(left.join(&right).unwrap().len(), joined.len());
    }

    #[test]
    fn selects_across_pages_and_stops_early() {
        let (vault, me) = vault_with_key();
        let issued = usd("Bank");
        seed(&vault, &issued, me, &[3, 3, 3, 3, 3, 3]);

        let selection = TokenSelection::new(&vault).with_page_size(2);
        let acc = selection.select(7, &SelectionCriteria::new(TokenType::usd())).unwrap();
        assert_eq!(acc.sum(), 9);
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn zero_amount_holdings_are_selected() {
        let (vault, me) = vault_with_key();
        let issued = usd("Bank");
        seed(&vault, &issued, me, &[0, 5]);
        let acc = TokenSelection::new(&vault)
            .select(5, &SelectionCriteria::new(TokenType::usd()))
            .unwrap();
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn issuer_filter_is_respected() {
        let (vault, me) = vault_with_key();
        let good = usd("Good Bank");
        let other = usd("Other Bank");
        seed(&vault, &other, me, &[50]);
        seed(&vault, &good, me, &[10, 10]);

        let criteria = SelectionCriteria::new(TokenType::usd()).issued_by(good.issuer.owning_key);
        let acc = TokenSelection::new(&vault).select(15, &criteria).unwrap();
        assert!(acc
            .states()
            .iter()
            .all(|s| s.get::<FungibleToken>().unwrap().issued == good));
        assert_eq!(acc.sum(), 20);
    }

    #[test]
    fn exhausted_vault_reports_what_was_available() {
        let (vault, me) = vault_with_key();
        seed(&vault, &usd("Bank"), me, &[4, 4]);
        let err = TokenSelection::new(&vault)
            .select(10, &SelectionCriteria::new(TokenType::usd()))
            .unwrap_err();
        assert!(matches!(
            err,
            SelectionError::InsufficientFunds {
                requested: 10,
                available: 8
            }
        ));
    }

    #[test]
    fn generate_move_adds_change() {
        let (vault, me) = vault_with_key();
        let issued = usd("Bank");
        seed(&vault, &issued, me, &[10, 20]);
        let payee = AbstractParty::new(KeyPair::generate().public_key());

        let generated = TokenSelection::new(&vault)
            .generate_move(&[(payee, 25)], me.into(), &SelectionCriteria::new(TokenType::usd()))
            .unwrap();
        assert_eq!(generated.inputs.len(), 2);
        let paid: u64 = generated.outputs.iter().filter(|o| o.holder == payee).map(|o| o.amount).sum();
        let change: Vec<&FungibleToken> = generated.outputs.iter().filter(|o| o.holder.owning_key == me).collect();
        assert_eq!(paid, 25);
        assert_eq!(change.len(), 1);
        assert_eq!(change[0].amount, 5);
    }

    #[test]
    fn generate_move_exact_has_no_change() {
        let (vault, me) = vault_with_key();
        seed(&vault, &usd("Bank"), me, &[10, 20, 5]);
        let payee = AbstractParty::new(KeyPair::generate().public_key());
        let generated = TokenSelection::new(&vault)
            .generate_move(&[(payee, 35)], me.into(), &SelectionCriteria::new(TokenType::usd()))
            .unwrap();
        assert_eq!(generated.inputs.len(), 3);
        assert!(generated.outputs.iter().all(|o| o.holder == payee));
    }

    #[test]
    fn held_by_us_draws_from_every_local_key() {
        let keys = Arc::new(KeyManager::new());
        let (legal, fresh) = (keys.fresh_key(), keys.fresh_key());
        let vault = Vault::open_temporary(keys).unwrap();
        let issued = usd("Bank");
        seed(&vault, &issued, legal, &[10]);
        seed(&vault, &issued, fresh, &[15]);
        let selection = TokenSelection::new(&vault);

        let narrow = SelectionCriteria::new(TokenType::usd()).held_by(legal);
        assert!(matches!(
            selection.select(25, &narrow),
            Err(SelectionError::InsufficientFunds { requested: 25, available: 10 })
        ));

        let ours = SelectionCriteria::new(TokenType::usd()).held_by_us();
        let acc = selection.select(25, &ours).unwrap();
        assert_eq!(acc.sum(), 25);
        assert_eq!(acc.len(), 2);
    }
}
