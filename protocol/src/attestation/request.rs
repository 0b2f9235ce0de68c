//! The requesting side: ask an attester for a status, or for its signature
//! over the parts of a transaction it is meant to see.

use tracing::{debug, info};

use super::service::{CERTIFY_PROTOCOL, QUERY_PROTOCOL};
use crate::crypto::TransactionSignature;
use crate::flows::FlowError;
use crate::identity::Party;
use crate::ledger::{DiligenceStatus, LinearId};
use crate::network::{Node, WireMessage};
use crate::transaction::{FilteredElement, FilteredTransaction, SignedTransaction};

pub async fn query_fact(node: &Node, oracle: &Party, subject: LinearId) -> Result<DiligenceStatus, FlowError> {
    let mut session = node.initiate(oracle, QUERY_PROTOCOL).await?;
    match session.send_and_receive(WireMessage::FactQuery(subject)).await? {
        WireMessage::FactStatus(status) => {
            debug!(subject = %subject, status = %status, oracle = %oracle, "status received");
            Ok(status)
        }
        other => Err(FlowError::unexpected("FactStatus", &other)),
    }
}

/// The view an attester gets: its own `Certify` commands and the time
/// window, nothing else.
pub fn attestation_view(stx: &SignedTransaction, oracle: &Party) -> FilteredTransaction {
    let key = oracle.owning_key;
    stx.tx().build_filtered_transaction(|e| match e {
        FilteredElement::Command(c) => c.value.is_certify() && c.requires(&key),
        FilteredElement::TimeWindow(_) => true,
        _ => false,
    })
}

/// Obtain `oracle`'s signature over `stx`. The signature is checked
/// before it is returned, but not attached.
pub async fn request_attestation(
    node: &Node,
    oracle: &Party,
    stx: &SignedTransaction,
) -> Result<TransactionSignature, FlowError> {
    let ftx = attestation_view(stx, oracle);
    submit_view(node, oracle, stx, ftx).await
}

/// Send an arbitrary view. [`request_attestation`] is the usual entry point.
pub async fn submit_view(
    node: &Node,
    oracle: &Party,
    stx: &SignedTransaction,
    ftx: FilteredTransaction,
) -> Result<TransactionSignature, FlowError> {
    let tx_id = stx.id();
    let mut session = node.initiate(oracle, CERTIFY_PROTOCOL).await?;
    let sig = match session.send_and_receive(WireMessage::FilteredTransaction(ftx)).await? {
        WireMessage::AttestationSignature(sig) => sig,
        other => return Err(FlowError::unexpected("AttestationSignature", &other)),
    };
    if sig.by != oracle.owning_key {
        return Err(FlowError::ValidationFailure(format!(
            "attestation signed by {} instead of {}",
            sig.by.short(),
            oracle
        )));
    }
    sig.verify(&tx_id)?;
    info!(tx_id = %tx_id.short(), oracle = %oracle, "attestation obtained");
    Ok(sig)
}
