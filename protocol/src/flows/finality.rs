//! # Finality
//!
//! Notarise a fully signed transaction, record it, and hand it to every
//! session opened for the run.
//!
//! ```text
//!   verify ─▶ notarise ─┬─ Conflict ─────────▶ DoubleSpendOrConflict
//!                       └─ signature ─▶ record locally
//!                                         │
//!                       ┌─────────────────┴──────────────┐
//!                       ▼                                ▼
//!             Notarized ─▶ peer A records ─▶ Ack   Notarized ─▶ peer B ...
//! ```
//!
//! A peer that fails to acknowledge does not undo anything: the
//! transaction is committed the moment the notary signs, and the peer can
//! fetch it again by id.

use futures::future::join_all;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::collect::CounterpartySession;
use super::error::FlowError;
use super::resolve::{check_dependencies, dependencies_of, require_network_notary, DependencyOverlay};
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::Party;
use crate::network::{Node, Session, TransactionRole, WireMessage};
use crate::transaction::SignedTransaction;
use crate::vault::StatesToRecord;

/// A committed transaction and the peers that never acknowledged it.
#[derive(Clone, Debug)]
pub struct Finalized {
    pub transaction: SignedTransaction,
    /// Hosts whose delivery failed. They can fetch the transaction by id.
    pub unacknowledged: Vec<Party>,
}

impl Finalized {
    pub fn is_fully_delivered(&self) -> bool {
        self.unacknowledged.is_empty()
    }

    pub fn into_transaction(self) -> SignedTransaction {
        self.transaction
    }
}

/// Notarise `stx`, record it and distribute it to `sessions`.
///
/// Once the notary has signed the call succeeds. Peers that fail to
/// acknowledge are reported in [`Finalized::unacknowledged`].
pub async fn finalize(
    node: &Node,
    stx: SignedTransaction,
    sessions: &mut [CounterpartySession],
) -> Result<Finalized, FlowError> {
    let tx_id = stx.id();
    let ltx = stx.tx().to_ledger_transaction(node.vault().as_ref())?;
    node.verifier().verify(&ltx)?;
    let notary_key = node.notary_party().owning_key;
    let allowed: BTreeSet<PublicKey> = [notary_key].into_iter().collect();
    stx.verify_signatures_except(&allowed)?;

    let notary_sig = match node.notary().notarise(&stx).await {
        Ok(sig) => sig,
        Err(e) => {
            warn!(tx_id = %tx_id.short(), party = %node.party(), error = %e, "notarisation failed");
            return Err(e.into());
        }
    };
    if notary_sig.by != notary_key {
        return Err(FlowError::ValidationFailure("notary signed with an unexpected key".into()));
    }
    let notarised = stx.with_additional_signature(notary_sig);
    notarised.verify_required_signatures()?;

    node.vault()
        .record_transactions(StatesToRecord::OnlyRelevant, std::slice::from_ref(&notarised))?;
    info!(tx_id = %tx_id.short(), party = %node.party(), peers = sessions.len(), "transaction committed");

    let dependencies = dependencies_of(node.vault(), notarised.tx())?;
    let deliveries = sessions.iter_mut().map(|cp| {
        let notarised = &notarised;
        let dependencies = &dependencies;
        async move {
            let counterparty = cp.counterparty().clone();
            match deliver(cp, notarised, dependencies).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(
                        tx_id = %tx_id.short(),
                        counterparty = %counterparty,
                        error = %e,
                        "peer did not acknowledge notarised transaction"
                    );
                    Some(counterparty)
                }
            }
        }
    });
    let unacknowledged: Vec<Party> = join_all(deliveries).await.into_iter().flatten().collect();
    Ok(Finalized {
        transaction: notarised,
        unacknowledged,
    })
}

async fn deliver(
    cp: &mut CounterpartySession,
    notarised: &SignedTransaction,
    dependencies: &[SignedTransaction],
) -> Result<(), FlowError> {
    if cp.role().is_none() {
        cp.send_role(TransactionRole::Participant).await?;
    }
    let reply = cp
        .session_mut()
        .send_and_receive(WireMessage::Notarized {
            transaction: notarised.clone(),
            dependencies: dependencies.to_vec(),
        })
        .await?;
    match reply {
        WireMessage::Ack => {
            debug!(tx_id = %notarised.id().short(), counterparty = %cp.counterparty(), "delivery acknowledged");
            Ok(())
        }
        other => Err(FlowError::unexpected("Ack", &other)),
    }
}

/// Receive a notarised transaction, check it, record it with its
/// dependencies and acknowledge.
///
/// When `expected_id` is set the transaction must be the one we signed.
pub async fn receive_finality(
    node: &Node,
    session: &mut Session,
    expected_id: Option<SecureHash>,
    states_to_record: StatesToRecord,
) -> Result<SignedTransaction, FlowError> {
    let (stx, dependencies) = match session.receive().await? {
        WireMessage::Notarized {
            transaction,
            dependencies,
        } => (transaction, dependencies),
        other => return Err(FlowError::unexpected("Notarized", &other)),
    };
    if let Some(expected) = expected_id {
        if stx.id() != expected {
            return Err(FlowError::ValidationFailure(format!(
                "received {} but signed {}",
                stx.id().short(),
                expected.short()
            )));
        }
    }
    record_checked(node, &stx, &dependencies, states_to_record)?;
    session.send(WireMessage::Ack).await?;
    info!(tx_id = %stx.id().short(), party = %node.party(), from = %session.counterparty(), "transaction received");
    Ok(stx)
}

/// Check a notarised transaction against its dependencies and record both.
pub fn record_checked(
    node: &Node,
    stx: &SignedTransaction,
    dependencies: &[SignedTransaction],
    states_to_record: StatesToRecord,
) -> Result<(), FlowError> {
    require_network_notary(node, stx.tx()).map_err(FlowError::ValidationFailure)?;
    check_dependencies(node, dependencies)?;
    stx.verify_required_signatures()?;
    let overlay = DependencyOverlay::new(node.vault(), dependencies);
    let ltx = stx.tx().to_ledger_transaction(&overlay)?;
    node.verifier().verify(&ltx)?;
    node.vault()
        .record_with_dependencies(states_to_record, stx, dependencies)?;
    Ok(())
}

/// Push an already notarised transaction to a party that tracks it.
pub async fn send_inform(node: &Node, session: &mut Session, stx: &SignedTransaction) -> Result<(), FlowError> {
    let dependencies = dependencies_of(node.vault(), stx.tx())?;
    let reply = session
        .send_and_receive(WireMessage::Inform {
            transaction: stx.clone(),
            dependencies,
        })
        .await?;
    match reply {
        WireMessage::Ack => Ok(()),
        other => Err(FlowError::unexpected("Ack", &other)),
    }
}

/// Receive a pushed transaction. Every output is tracked, since the
/// receiver is usually an observer rather than a participant.
pub async fn receive_inform(node: &Node, session: &mut Session) -> Result<SignedTransaction, FlowError> {
    let (stx, dependencies) = match session.receive().await? {
        WireMessage::Inform {
            transaction,
            dependencies,
        } => (transaction, dependencies),
        other => return Err(FlowError::unexpected("Inform", &other)),
    };
    record_checked(node, &stx, &dependencies, StatesToRecord::AllVisible)?;
    session.send(WireMessage::Ack).await?;
    debug!(tx_id = %stx.id().short(), party = %node.party(), "informed of transaction");
    Ok(stx)
}
