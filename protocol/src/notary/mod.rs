//! # Notary
//!
//! The only source of ordering in the system. A notary signs a
//! transaction once it is satisfied that none of its inputs has been
//! consumed by a different transaction, that its reference inputs are
//! still current, and that its validity window contains the notary's
//! clock. Everything else about the transaction is the parties' business.
//!
//! ```text
//!   inputs ─┬─ spent by another tx ──────────▶ Conflict
//!           ├─ spent by this tx (replay) ─────▶ sign again
//!           └─ unseen ─▶ window contains now? ─▶ mark spent by tx, sign
//!                                 └─ no ──────▶ OutsideTimeWindow
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::crypto::{KeyPair, SecureHash, SignatureError, TransactionSignature};
use crate::identity::Party;
use crate::ledger::StateRef;
use crate::transaction::{SignedTransaction, TimeWindow};

#[derive(Debug, Error)]
pub enum NotaryError {
    #[error("transaction names notary {named:?}, not {ours}")]
    WrongNotary { named: Option<String>, ours: String },

    #[error("signature check failed: {0}")]
    Signatures(#[from] SignatureError),

    #[error("time {now} is outside the validity window {window}")]
    OutsideTimeWindow { window: TimeWindow, now: String },

    /// Some inputs were consumed by another transaction, or some
    /// references are no longer current.
    #[error("transaction {tx_id} conflicts on {} state(s)", conflicts.len())]
    Conflict { tx_id: SecureHash, conflicts: Vec<StateRef> },
}

/// A service providing consume-once ordering.
#[async_trait]
pub trait NotaryService: Send + Sync {
    fn identity(&self) -> &Party;

    /// Commit `stx` and return the notary's signature over its id.
    async fn notarise(&self, stx: &SignedTransaction) -> Result<TransactionSignature, NotaryError>;
}

/// An in-memory, non-validating notary.
pub struct SimpleNotary {
    party: Party,
    keypair: KeyPair,
    clock: Arc<dyn Clock>,
    spent: Mutex<HashMap<StateRef, SecureHash>>,
}

impl SimpleNotary {
    pub fn new(name: &str, keypair: KeyPair, clock: Arc<dyn Clock>) -> Self {
        Self {
            party: Party::new(name, keypair.public_key()),
            keypair,
            clock,
            spent: Mutex::new(HashMap::new()),
        }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    /// The transaction that consumed `state`, if any.
    pub fn consumed_by(&self, state: &StateRef) -> Option<SecureHash> {
        self.spent.lock().get(state).copied()
    }

    /// Conflicts are reported before the time window is looked at, and
    /// nothing is marked spent unless both checks pass.
    fn commit(&self, tx_id: SecureHash, stx: &SignedTransaction) -> Result<(), NotaryError> {
        let mut spent = self.spent.lock();
        let mut conflicts: Vec<StateRef> = stx
            .tx()
            .inputs
            .iter()
            .filter(|input| spent.get(*input).is_some_and(|by| *by != tx_id))
            .copied()
            .collect();
        conflicts.extend(stx.tx().references.iter().filter(|r| spent.contains_key(*r)).copied());
        if !conflicts.is_empty() {
            return Err(NotaryError::Conflict { tx_id, conflicts });
        }

        if let Some(window) = stx.tx().time_window {
            let now = self.clock.now();
            if !window.contains(now) {
                return Err(NotaryError::OutsideTimeWindow {
                    window,
                    now: now.to_rfc3339(),
                });
            }
        }

        for input in &stx.tx().inputs {
            spent.insert(*input, tx_id);
        }
        Ok(())
    }
}

#[async_trait]
impl NotaryService for SimpleNotary {
    fn identity(&self) -> &Party {
        &self.party
    }

    async fn notarise(&self, stx: &SignedTransaction) -> Result<TransactionSignature, NotaryError> {
        let tx_id = stx.id();
        if stx.tx().notary.as_ref() != Some(&self.party) {
            return Err(NotaryError::WrongNotary {
                named: stx.tx().notary.as_ref().map(|p| p.name.clone()),
                ours: self.party.name.clone(),
            });
        }

        let mine: BTreeSet<_> = [self.party.owning_key].into_iter().collect();
        stx.verify_signatures_except(&mine)?;

        if let Err(e) = self.commit(tx_id, stx) {
            warn!(tx_id = %tx_id.short(), error = %e, "notarisation refused");
            return Err(e);
        }
        info!(
            tx_id = %tx_id.short(),
            inputs = stx.tx().inputs.len(),
            "transaction notarised"
        );
        Ok(TransactionSignature::sign(&self.keypair, &tx_id))
    }
}

impl std::fmt::Debug for SimpleNotary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleNotary")
            .field("party", &self.party)
            .field("spent", &self.spent.lock().len())
            .finish()
    }
}
