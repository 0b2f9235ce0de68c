//! Key synchronisation inside a signing session.
//!
//! The proposer lists the keys it uses in the transaction. The reviewer
//! answers with the ones it cannot resolve, and the proposer proves
//! ownership of each: the key signs its binding to the proposer's legal
//! identity.

use tracing::debug;

use super::error::FlowError;
use crate::crypto::PublicKey;
use crate::identity::KeyOwnershipProof;
use crate::network::{Node, Session, WireMessage};
use crate::transaction::WireTransaction;

/// Keys of ours appearing anywhere in `wtx`: command signers and output
/// participants.
pub fn our_keys_in(node: &Node, wtx: &WireTransaction) -> Vec<PublicKey> {
    let candidates: Vec<PublicKey> = wtx
        .commands
        .iter()
        .flat_map(|c| c.signers.iter().copied())
        .chain(wtx.outputs.iter().flat_map(|o| o.data.participant_keys()))
        .collect();
    node.keys().filter_mine(&candidates).into_iter().collect()
}

/// Proposer side.
pub async fn sync_keys(node: &Node, session: &mut Session, keys: Vec<PublicKey>) -> Result<(), FlowError> {
    let missing = match session.send_and_receive(WireMessage::IdentityQuery(keys)).await? {
        WireMessage::MissingKeys(missing) => missing,
        other => return Err(FlowError::unexpected("MissingKeys", &other)),
    };
    let proofs = missing
        .iter()
        .filter(|k| node.keys().is_mine(k))
        .map(|k| KeyOwnershipProof::create(node.keys(), k, node.party()))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        party = %node.party(),
        counterparty = %session.counterparty(),
        missing = missing.len(),
        proved = proofs.len(),
        "keys synchronised"
    );
    session.send(WireMessage::ResolvedKeys(proofs)).await?;
    Ok(())
}

/// Reviewer side. Only proofs naming the counterparty as host are
/// accepted.
pub async fn sync_keys_handler(node: &Node, session: &mut Session) -> Result<(), FlowError> {
    let keys = match session.receive().await? {
        WireMessage::IdentityQuery(keys) => keys,
        other => return Err(FlowError::unexpected("IdentityQuery", &other)),
    };
    let missing = node.identity().unknown_keys(&keys);
    let proofs = match session.send_and_receive(WireMessage::MissingKeys(missing.clone())).await? {
        WireMessage::ResolvedKeys(proofs) => proofs,
        other => return Err(FlowError::unexpected("ResolvedKeys", &other)),
    };
    for proof in &proofs {
        if !missing.contains(&proof.key) {
            return Err(FlowError::ValidationFailure(format!(
                "unsolicited proof for key {}",
                proof.key.short()
            )));
        }
        if &proof.host != session.counterparty() {
            return Err(FlowError::ValidationFailure(format!(
                "proof for key {} names host {}",
                proof.key.short(),
                proof.host
            )));
        }
        node.identity().register_proof(proof)?;
    }
    Ok(())
}
