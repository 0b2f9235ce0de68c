//! # Vault — a participant's local ledger store
//!
//! Built on sled. Every participant owns one vault; nothing in it is
//! shared with anyone else. Convergence between vaults happens only by
//! recording the same notarised transactions.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                      | Value                  |
//! |----------------|--------------------------|------------------------|
//! | `transactions` | `tx_id` (32B)            | `bincode(SignedTransaction)` |
//! | `states`       | `seq` (8B BE)            | `bincode(StoredState)` |
//! | `state_index`  | `StateRef` (36B)         | `seq` (8B BE)          |
//! | `meta`         | UTF-8 key                | bytes                  |
//!
//! `seq` grows with every tracked state, so iterating `states` yields
//! records in the order they were recorded. Queries and coin selection
//! page through that order.
//!
//! ## Atomicity
//!
//! [`Vault::record_transactions`] writes the transactions, marks their
//! inputs consumed and inserts relevant outputs inside one multi-tree
//! sled transaction. Either the whole batch lands or none of it does.

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::VAULT_UPDATE_CAPACITY;
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::KeyManager;
use crate::ledger::{ContractState, LinearId, StateAndRef, StateRef, StateType, TokenType, TransactionState};
use crate::transaction::{SignedTransaction, StateLoader};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Codec(String),

    /// Pages are numbered from 1 and must hold at least one record.
    #[error("invalid page specification: number {number}, size {size}")]
    InvalidPage { number: usize, size: usize },
}

impl From<bincode::Error> for VaultError {
    fn from(e: bincode::Error) -> Self {
        VaultError::Codec(e.to_string())
    }
}

const META_NEXT_SEQ: &[u8] = b"next_state_seq";

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Which outputs of a transaction to track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatesToRecord {
    /// Store the transaction only. Used for dependencies.
    None,
    /// Track outputs with at least one participant key held by this node.
    OnlyRelevant,
    /// Track every output.
    AllVisible,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StateStatus {
    #[default]
    Unconsumed,
    Consumed,
    All,
}

/// Filter over tracked states. Unset fields match anything.
#[derive(Clone, Debug, Default)]
pub struct QueryCriteria {
    pub status: StateStatus,
    pub state_type: Option<StateType>,
    pub linear_id: Option<LinearId>,
    /// Token holder, or any participant for non-token records.
    pub participant: Option<PublicKey>,
    pub issuer: Option<PublicKey>,
    pub token_type: Option<TokenType>,
}

impl QueryCriteria {
    pub fn unconsumed() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: StateStatus) -> Self {
        self.status = status;
        self
    }

    pub fn of_type(mut self, state_type: StateType) -> Self {
        self.state_type = Some(state_type);
        self
    }

    pub fn linear(mut self, id: LinearId) -> Self {
        self.linear_id = Some(id);
        self
    }

    pub fn held_by(mut self, key: PublicKey) -> Self {
        self.participant = Some(key);
        self
    }

    pub fn issued_by(mut self, key: PublicKey) -> Self {
        self.issuer = Some(key);
        self
    }

    pub fn token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    fn matches(&self, stored: &StoredState) -> bool {
        let status_ok = match self.status {
            StateStatus::Unconsumed => stored.consumed_by.is_none(),
            StateStatus::Consumed => stored.consumed_by.is_some(),
            StateStatus::All => true,
        };
        let data = &stored.state.data;
        let (issuer, token_type) = match data {
            ContractState::Fungible(t) => (Some(t.issued.issuer.owning_key), Some(&t.issued.token_type)),
            ContractState::Unique(t) => (Some(t.issued.issuer.owning_key), Some(&t.issued.token_type)),
            _ => (None, None),
        };
        let participant_ok = self.participant.map_or(true, |key| match data.holder() {
            Some(holder) => holder.owning_key == key,
            None => data.participant_keys().contains(&key),
        });

        status_ok
            && self.state_type.map_or(true, |t| data.state_type() == t)
            && self.linear_id.map_or(true, |id| data.linear_id() == Some(id))
            && participant_ok
            && self.issuer.map_or(true, |k| issuer == Some(k))
            && self.token_type.as_ref().map_or(true, |t| token_type == Some(t))
    }
}

/// One page of query results. Pages are numbered from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSpecification {
    pub number: usize,
    pub size: usize,
}

impl PageSpecification {
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }
}

#[derive(Clone, Debug)]
pub struct Page {
    pub states: Vec<StateAndRef>,
    /// Matching states across all pages.
    pub total_available: usize,
}

/// What one recorded transaction did to this vault.
#[derive(Clone, Debug)]
pub struct VaultUpdate {
    pub tx_id: SecureHash,
    pub consumed: Vec<StateAndRef>,
    pub produced: Vec<StateAndRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredState {
    reference: StateRef,
    state: TransactionState,
    consumed_by: Option<SecureHash>,
}

impl StoredState {
    fn to_state_and_ref(&self) -> StateAndRef {
        StateAndRef::new(self.state.clone(), self.reference)
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// A participant's transaction and state store.
#[derive(Debug)]
pub struct Vault {
    db: Db,
    transactions: Tree,
    states: Tree,
    state_index: Tree,
    meta: Tree,
    keys: Arc<KeyManager>,
    updates: broadcast::Sender<VaultUpdate>,
}

impl Vault {
    pub fn open<P: AsRef<Path>>(path: P, keys: Arc<KeyManager>) -> Result<Self, VaultError> {
        Self::from_db(sled::open(path)?, keys)
    }

    /// In-memory store, removed on drop.
    pub fn open_temporary(keys: Arc<KeyManager>) -> Result<Self, VaultError> {
        Self::from_db(sled::Config::new().temporary(true).open()?, keys)
    }

    fn from_db(db: Db, keys: Arc<KeyManager>) -> Result<Self, VaultError> {
        let (updates, _) = broadcast::channel(VAULT_UPDATE_CAPACITY);
        Ok(Self {
            transactions: db.open_tree("transactions")?,
            states: db.open_tree("states")?,
            state_index: db.open_tree("state_index")?,
            meta: db.open_tree("meta")?,
            db,
            keys,
            updates,
        })
    }

    /// Subscribe to per-transaction updates. Only transactions recorded
    /// after the call are seen.
    pub fn updates(&self) -> broadcast::Receiver<VaultUpdate> {
        self.updates.subscribe()
    }

    /// Whether the vault's key manager holds `key`.
    pub fn is_ours(&self, key: &PublicKey) -> bool {
        self.keys.is_mine(key)
    }

    fn is_relevant(&self, state: &ContractState) -> bool {
        !self.keys.filter_mine(&state.participant_keys()).is_empty()
    }

    /// Record notarised transactions in order, atomically.
    ///
    /// Already-recorded transactions are skipped, so replaying a batch is
    /// harmless. Returns one update per newly recorded transaction.
    pub fn record_transactions(
        &self,
        states_to_record: StatesToRecord,
        txs: &[SignedTransaction],
    ) -> Result<Vec<VaultUpdate>, VaultError> {
        let batch: Vec<(StatesToRecord, &SignedTransaction)> = txs.iter().map(|t| (states_to_record, t)).collect();
        self.record_batch(&batch)
    }

    /// Record `stx` together with the transactions that created its inputs
    /// and references, in one atomic batch. Dependencies are stored for
    /// resolution only; their outputs are not tracked.
    pub fn record_with_dependencies(
        &self,
        states_to_record: StatesToRecord,
        stx: &SignedTransaction,
        dependencies: &[SignedTransaction],
    ) -> Result<Vec<VaultUpdate>, VaultError> {
        let mut batch: Vec<(StatesToRecord, &SignedTransaction)> =
            dependencies.iter().map(|d| (StatesToRecord::None, d)).collect();
        batch.push((states_to_record, stx));
        self.record_batch(&batch)
    }

    fn record_batch(&self, batch: &[(StatesToRecord, &SignedTransaction)]) -> Result<Vec<VaultUpdate>, VaultError> {
        let prepared: Vec<(SecureHash, Vec<u8>, StatesToRecord, &SignedTransaction)> = batch
            .iter()
            .map(|(visibility, stx)| Ok((stx.id(), bincode::serialize(*stx)?, *visibility, *stx)))
            .collect::<Result<_, VaultError>>()?;

        let result = (&self.transactions, &self.states, &self.state_index, &self.meta).transaction(
            |(t_txs, t_states, t_index, t_meta)| {
                let abort = |e: bincode::Error| ConflictableTransactionError::Abort(VaultError::from(e));
                let mut next_seq = match t_meta.get(META_NEXT_SEQ)? {
                    Some(raw) => bincode::deserialize::<u64>(&raw).map_err(abort)?,
                    None => 0,
                };
                let mut updates = Vec::new();

                for (id, encoded, states_to_record, stx) in &prepared {
                    if t_txs.get(id.as_bytes())?.is_some() {
                        continue;
                    }
                    t_txs.insert(id.as_bytes().as_slice(), encoded.as_slice())?;

                    let mut consumed = Vec::new();
                    for input in &stx.tx().inputs {
                        let Some(seq) = t_index.get(input.to_key())? else {
                            continue;
                        };
                        let Some(raw) = t_states.get(&seq)? else {
                            continue;
                        };
                        let mut stored: StoredState = bincode::deserialize(&raw).map_err(abort)?;
                        if stored.consumed_by.is_none() {
                            stored.consumed_by = Some(*id);
                            t_states.insert(seq.clone(), bincode::serialize(&stored).map_err(abort)?)?;
                            consumed.push(stored.to_state_and_ref());
                        }
                    }

                    let mut produced = Vec::new();
                    for (index, output) in stx.tx().outputs.iter().enumerate() {
                        let track = match *states_to_record {
                            StatesToRecord::None => false,
                            StatesToRecord::OnlyRelevant => self.is_relevant(&output.data),
                            StatesToRecord::AllVisible => true,
                        };
                        if !track {
                            continue;
                        }
                        let reference = StateRef::new(*id, index as u32);
                        if t_index.get(reference.to_key())?.is_some() {
                            continue;
                        }
                        let stored = StoredState {
                            reference,
                            state: output.clone(),
                            consumed_by: None,
                        };
                        let seq_key = next_seq.to_be_bytes();
                        next_seq += 1;
                        t_states.insert(&seq_key[..], bincode::serialize(&stored).map_err(abort)?)?;
                        t_index.insert(reference.to_key().as_slice(), &seq_key[..])?;
                        produced.push(stored.to_state_and_ref());
                    }

                    updates.push(VaultUpdate {
                        tx_id: *id,
                        consumed,
                        produced,
                    });
                }

                t_meta.insert(META_NEXT_SEQ, bincode::serialize(&next_seq).map_err(abort)?)?;
                Ok(updates)
            },
        );

        let updates = result.map_err(|e| match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => VaultError::Sled(inner),
        })?;

        for update in &updates {
            info!(
                tx_id = %update.tx_id.short(),
                consumed = update.consumed.len(),
                produced = update.produced.len(),
                "transaction recorded"
            );
            // No subscribers is fine.
            let _ = self.updates.send(update.clone());
        }
        Ok(updates)
    }

    pub fn transaction(&self, id: &SecureHash) -> Result<Option<SignedTransaction>, VaultError> {
        match self.transactions.get(id.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn has_transaction(&self, id: &SecureHash) -> Result<bool, VaultError> {
        Ok(self.transactions.contains_key(id.as_bytes())?)
    }

    /// Resolve a reference through the transaction that created it.
    pub fn state(&self, reference: &StateRef) -> Result<Option<StateAndRef>, VaultError> {
        let Some(stx) = self.transaction(&reference.txhash)? else {
            return Ok(None);
        };
        Ok(stx
            .tx()
            .outputs
            .get(reference.index as usize)
            .map(|s| StateAndRef::new(s.clone(), *reference)))
    }

    /// `Some(true)` if tracked and consumed, `Some(false)` if tracked and
    /// current, `None` if not tracked.
    pub fn is_consumed(&self, reference: &StateRef) -> Result<Option<bool>, VaultError> {
        let Some(seq) = self.state_index.get(reference.to_key())? else {
            return Ok(None);
        };
        let Some(raw) = self.states.get(seq)? else {
            return Ok(None);
        };
        let stored: StoredState = bincode::deserialize(&raw)?;
        Ok(Some(stored.consumed_by.is_some()))
    }

    /// Page through tracked states matching `criteria`, in recording order.
    pub fn query(&self, criteria: &QueryCriteria, page: PageSpecification) -> Result<Page, VaultError> {
        if page.number == 0 || page.size == 0 {
            return Err(VaultError::InvalidPage {
                number: page.number,
                size: page.size,
            });
        }
        let skip = (page.number - 1).saturating_mul(page.size);
        let mut states = Vec::with_capacity(page.size);
        let mut total_available = 0usize;

        for entry in self.states.iter() {
            let (_, raw) = entry?;
            let stored: StoredState = bincode::deserialize(&raw)?;
            if !criteria.matches(&stored) {
                continue;
            }
            if total_available >= skip && states.len() < page.size {
                states.push(stored.to_state_and_ref());
            }
            total_available += 1;
        }
        debug!(matched = total_available, returned = states.len(), page = page.number, "vault query");
        Ok(Page {
            states,
            total_available,
        })
    }

    /// Every state matching `criteria`, across all pages.
    pub fn query_all(&self, criteria: &QueryCriteria) -> Result<Vec<StateAndRef>, VaultError> {
        let mut all = Vec::new();
        for entry in self.states.iter() {
            let (_, raw) = entry?;
            let stored: StoredState = bincode::deserialize(&raw)?;
            if criteria.matches(&stored) {
                all.push(stored.to_state_and_ref());
            }
        }
        Ok(all)
    }

    /// The current version of a linear record, if tracked.
    pub fn unconsumed_linear(&self, id: LinearId) -> Result<Option<StateAndRef>, VaultError> {
        let page = self.query(&QueryCriteria::unconsumed().linear(id), PageSpecification::new(1, 1))?;
        Ok(page.states.into_iter().next())
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn flush(&self) -> Result<(), VaultError> {
        self.db.flush()?;
        Ok(())
    }
}

impl StateLoader for Vault {
    fn load_state(&self, reference: &StateRef) -> Result<Option<TransactionState>, VaultError> {
        Ok(self.state(reference)?.map(|s| s.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, TransactionSignature};
    use crate::identity::Party;
    use crate::ledger::{FungibleToken, IssuedTokenType};
    use crate::transaction::{Command, CommandData, TokenAction, WireTransaction};

    struct Fixture {
        vault: Vault,
        me: PublicKey,
        notary: Party,
        token: IssuedTokenType,
    }

    fn fixture() -> Fixture {
        let keys = Arc::new(KeyManager::new());
        let me = keys.fresh_key();
        let issuer = Party::new("Issuer", KeyPair::generate().public_key());
        Fixture {
            vault: Vault::open_temporary(keys).unwrap(),
            me,
            notary: Party::new("Notary", KeyPair::generate().public_key()),
            token: IssuedTokenType::new(issuer, TokenType::usd()),
        }
    }

    fn issue(f: &Fixture, holder: PublicKey, amounts: &[u64], salt: u8) -> SignedTransaction {
        let wtx = WireTransaction {
            inputs: vec![],
            references: vec![],
            outputs: amounts
                .iter()
                .map(|a| TransactionState::new(FungibleToken::new(f.token.clone(), holder.into(), *a), f.notary.clone()))
                .collect(),
            commands: vec![Command::new(
                CommandData::token(TokenAction::Issue, f.token.clone()),
                [f.token.issuer.owning_key],
            )],
            notary: Some(f.notary.clone()),
            time_window: None,
            privacy_salt: [salt; 32],
        };
        SignedTransaction::new(wtx, vec![])
    }

    fn spend(f: &Fixture, inputs: Vec<StateRef>, salt: u8) -> SignedTransaction {
        let wtx = WireTransaction {
            inputs,
            references: vec![],
            outputs: vec![],
            commands: vec![Command::new(
                CommandData::token(TokenAction::Redeem, f.token.clone()),
                [f.me],
            )],
            notary: Some(f.notary.clone()),
            time_window: None,
            privacy_salt: [salt; 32],
        };
        let id = wtx.id();
        let notary_sig = TransactionSignature::sign(&KeyPair::generate(), &id);
        SignedTransaction::new(wtx, vec![notary_sig])
    }

    #[test]
    fn only_relevant_outputs_are_tracked() {
        let f = fixture();
        let stranger = KeyPair::generate().public_key();
        let mine = issue(&f, f.me, &[10, 20], 1);
        let theirs = issue(&f, stranger, &[99], 2);
        f.vault
            .record_transactions(StatesToRecord::OnlyRelevant, &[mine, theirs.clone()])
            .unwrap();

        let all = f.vault.query_all(&QueryCriteria::unconsumed()).unwrap();
        assert_eq!(all.len(), 2);
        // The irrelevant transaction is still stored for resolution.
        assert!(f.vault.transaction(&theirs.id()).unwrap().is_some());
        assert!(f.vault.state(&theirs.tx().out_ref(0)).unwrap().is_some());
    }

    #[test]
    fn recording_is_idempotent() {
        let f = fixture();
        let stx = issue(&f, f.me, &[5], 1);
        let first = f.vault.record_transactions(StatesToRecord::OnlyRelevant, &[stx.clone()]).unwrap();
        let second = f.vault.record_transactions(StatesToRecord::OnlyRelevant, &[stx]).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(f.vault.query_all(&QueryCriteria::unconsumed()).unwrap().len(), 1);
    }

    #[test]
    fn consuming_transaction_marks_inputs_spent() {
        let f = fixture();
        let stx = issue(&f, f.me, &[5, 6], 1);
        let out0 = stx.tx().out_ref(0);
        f.vault.record_transactions(StatesToRecord::OnlyRelevant, &[stx]).unwrap();

        let mut rx = f.vault.updates();
        let spender = spend(&f, vec![out0], 2);
        f.vault.record_transactions(StatesToRecord::OnlyRelevant, &[spender]).unwrap();

        assert_eq!(f.vault.is_consumed(&out0).unwrap(), Some(true));
        let current = f.vault.query_all(&QueryCriteria::unconsumed()).unwrap();
        assert_eq!(current.len(), 1);
        let consumed = f
            .vault
            .query_all(&QueryCriteria::unconsumed().with_status(StateStatus::Consumed))
            .unwrap();
        assert_eq!(consumed[0].reference, out0);

        let update = rx.try_recv().unwrap();
        assert_eq!(update.consumed.len(), 1);
        assert!(update.produced.is_empty());
    }

    #[test]
    fn pagination_walks_recording_order() {
        let f = fixture();
        let stx = issue(&f, f.me, &[1, 2, 3, 4, 5], 1);
        f.vault.record_transactions(StatesToRecord::OnlyRelevant, &[stx]).unwrap();

        let criteria = QueryCriteria::unconsumed().of_type(StateType::Fungible);
        let p1 = f.vault.query(&criteria, PageSpecification::new(1, 2)).unwrap();
        let p3 = f.vault.query(&criteria, PageSpecification::new(3, 2)).unwrap();
        assert_eq!(p1.total_available, 5);
        let amounts: Vec<u64> = p1
            .states
            .iter()
            .chain(&p3.states)
            .map(|s| s.get::<FungibleToken>().unwrap().amount)
            .collect();
        assert_eq!(amounts, vec![1, 2, 5]);
    }

    #[test]
    fn page_zero_is_invalid() {
        let f = fixture();
        assert!(matches!(
            f.vault.query(&QueryCriteria::unconsumed(), PageSpecification::new(0, 10)),
            Err(VaultError::InvalidPage { .. })
        ));
    }

    #[test]
    fn dependency_recording_tracks_no_states() {
        let f = fixture();
        let stx = issue(&f, f.me, &[5], 1);
        f.vault.record_transactions(StatesToRecord::None, &[stx.clone()]).unwrap();
        assert!(f.vault.query_all(&QueryCriteria::unconsumed()).unwrap().is_empty());
        assert!(f.vault.has_transaction(&stx.id()).unwrap());
    }

    #[test]
    fn dependencies_land_with_the_transaction() {
        let f = fixture();
        let stranger = KeyPair::generate().public_key();
        let dep = issue(&f, stranger, &[3], 1);
        let stx = issue(&f, f.me, &[4], 2);
        let updates = f
            .vault
            .record_with_dependencies(StatesToRecord::OnlyRelevant, &stx, &[dep.clone()])
            .unwrap();
        assert_eq!(updates.len(), 2);
        assert!(f.vault.has_transaction(&dep.id()).unwrap());
        assert_eq!(f.vault.is_consumed(&dep.tx().out_ref(0)).unwrap(), None);
        assert_eq!(f.vault.is_consumed(&stx.tx().out_ref(0)).unwrap(), Some(false));
    }

    #[test]
    fn on_disk_vault_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let keys = Arc::new(KeyManager::new());
        let me = keys.fresh_key();
        let f = Fixture {
            vault: Vault::open(dir.path(), keys.clone()).unwrap(),
            me,
            notary: Party::new("Notary", KeyPair::generate().public_key()),
            token: IssuedTokenType::new(Party::new("Issuer", KeyPair::generate().public_key()), TokenType::usd()),
        };
        let stx = issue(&f, me, &[7], 1);
        f.vault.record_transactions(StatesToRecord::OnlyRelevant, &[stx.clone()]).unwrap();
        f.vault.flush().unwrap();
        drop(f);

        let reopened = Vault::open(dir.path(), keys).unwrap();
        assert!(reopened.has_transaction(&stx.id()).unwrap());
        assert_eq!(reopened.query_all(&QueryCriteria::unconsumed()).unwrap().len(), 1);
    }
}
