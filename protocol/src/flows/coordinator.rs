//! One initiator and one responder that every workflow reuses.
//!
//! The initiator decides per host whether it must co-sign or only be
//! informed, tells each host its role before anything else, collects
//! signatures and finalises. The responder reads the role and either
//! reviews and signs, or just waits for the notarised result.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use super::collect::{collect_signatures, CounterpartySession};
use super::error::FlowError;
use super::finality::{finalize, receive_finality, Finalized};
use super::sign::{sign_transaction, AdditionalCheck};
use crate::identity::Party;
use crate::network::{FlowResponder, Node, Session, TransactionRole, WireMessage};
use crate::transaction::SignedTransaction;
use crate::vault::StatesToRecord;

/// Hosts that must sign `stx`, other than ourselves and the notary.
pub fn signer_hosts(node: &Node, stx: &SignedTransaction) -> Result<BTreeSet<Party>, FlowError> {
    let notary_key = node.notary_party().owning_key;
    let mut hosts = BTreeSet::new();
    for key in stx.missing_signers() {
        if key == notary_key || node.keys().is_mine(&key) {
            continue;
        }
        hosts.insert(node.identity().require_host(&key)?);
    }
    hosts.remove(node.party());
    Ok(hosts)
}

/// Hosts of output participants we can resolve, plus `observers`.
fn informed_hosts(node: &Node, stx: &SignedTransaction, observers: &[Party]) -> BTreeSet<Party> {
    let mut hosts: BTreeSet<Party> = stx
        .tx()
        .outputs
        .iter()
        .flat_map(|o| o.data.participant_keys())
        .filter(|k| !node.keys().is_mine(k))
        .filter_map(|k| node.identity().well_known_party_from_key(&k))
        .collect();
    hosts.extend(observers.iter().cloned());
    hosts.remove(node.party());
    hosts
}

/// Run `stx` from partly signed to final under `protocol`.
///
/// Signers get [`TransactionRole::Signer`] and review the transaction;
/// everyone else touched by an output, and every observer, gets
/// [`TransactionRole::Participant`] and receives the final result only.
pub async fn coordinate(
    node: &Node,
    protocol: &str,
    stx: SignedTransaction,
    observers: &[Party],
) -> Result<SignedTransaction, FlowError> {
    coordinate_finalized(node, protocol, stx, observers)
        .await
        .map(Finalized::into_transaction)
}

/// As [`coordinate`], also reporting the hosts that never acknowledged
/// the notarised transaction.
pub async fn coordinate_finalized(
    node: &Node,
    protocol: &str,
    stx: SignedTransaction,
    observers: &[Party],
) -> Result<Finalized, FlowError> {
    let signers = signer_hosts(node, &stx)?;
    let mut informed = informed_hosts(node, &stx, observers);
    informed.retain(|p| !signers.contains(p) && p != node.notary_party());

    info!(
        tx_id = %stx.id().short(),
        party = %node.party(),
        protocol,
        signers = signers.len(),
        informed = informed.len(),
        "coordinating transaction"
    );

    let mut signer_sessions = Vec::with_capacity(signers.len());
    for host in &signers {
        let mut cp = CounterpartySession::new(node.initiate(host, protocol).await?);
        cp.send_role(TransactionRole::Signer).await?;
        signer_sessions.push(cp);
    }
    let mut informed_sessions = Vec::with_capacity(informed.len());
    for host in &informed {
        let mut cp = CounterpartySession::new(node.initiate(host, protocol).await?);
        cp.send_role(TransactionRole::Participant).await?;
        informed_sessions.push(cp);
    }

    let signed = collect_signatures(node, stx, &mut signer_sessions).await?;
    signer_sessions.extend(informed_sessions);
    finalize(node, signed, &mut signer_sessions).await
}

/// The responding half of [`coordinate`]. Informed parties track only
/// the outputs relevant to them.
pub async fn respond(
    node: &Node,
    session: &mut Session,
    check: &dyn AdditionalCheck,
) -> Result<SignedTransaction, FlowError> {
    respond_recording(node, session, check, StatesToRecord::OnlyRelevant).await
}

/// As [`respond`], with informed parties tracking outputs per
/// `informed_records`. Observers pass [`StatesToRecord::AllVisible`].
pub async fn respond_recording(
    node: &Node,
    session: &mut Session,
    check: &dyn AdditionalCheck,
    informed_records: StatesToRecord,
) -> Result<SignedTransaction, FlowError> {
    let role = match session.receive().await? {
        WireMessage::Role(role) => role,
        other => return Err(FlowError::unexpected("Role", &other)),
    };
    match role {
        TransactionRole::Signer => {
            let id = sign_transaction(node, session, check).await?;
            receive_finality(node, session, Some(id), StatesToRecord::OnlyRelevant).await
        }
        TransactionRole::Participant => receive_finality(node, session, None, informed_records).await,
    }
}

/// A [`FlowResponder`] running [`respond`] with a fixed check.
pub struct CoordinatedResponder<C> {
    check: C,
    informed_records: StatesToRecord,
}

impl<C: AdditionalCheck> CoordinatedResponder<C> {
    pub fn new(check: C) -> Self {
        Self {
            check,
            informed_records: StatesToRecord::OnlyRelevant,
        }
    }

    /// Track every output when only informed, not just relevant ones.
    pub fn observing(mut self) -> Self {
        self.informed_records = StatesToRecord::AllVisible;
        self
    }
}

#[async_trait]
impl<C: AdditionalCheck + 'static> FlowResponder for CoordinatedResponder<C> {
    async fn respond(&self, node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
        respond_recording(&node, session, &self.check, self.informed_records)
            .await
            .map(|_| ())
    }
}
