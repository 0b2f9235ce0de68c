//! Due-diligence requests.
//!
//! A prospective buyer prepares a request with the token's holder, naming
//! the oracle that will later certify the token's status. The request is
//! usually consumed inside the sale (see [`accept_sale`](super::accept_sale));
//! it can also be certified on its own or dropped.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tracing::info;

use accord_protocol::attestation::{query_fact, request_attestation};
use accord_protocol::clock::Clock;
use accord_protocol::flows::{coordinate, CoordinatedResponder, FlowError, SigningContext};
use accord_protocol::identity::{AbstractParty, Party};
use accord_protocol::ledger::{DiligenceStatus, DueDiligence, LinearId, StateAndRef, UniqueToken};
use accord_protocol::network::Node;
use accord_protocol::transaction::{CommandData, DiligenceCommand, SignedTransaction, TimeWindow, TransactionBuilder};

use super::{
    find_linear, informed_only, output_of, DILIGENCE_CERTIFY_PROTOCOL, DILIGENCE_DROP_PROTOCOL,
    DILIGENCE_PREPARE_PROTOCOL,
};

/// Agree with `participants` that `oracle` will certify `token_id`.
/// This node's legal identity joins the participants if absent.
pub async fn prepare_diligence(
    node: &Node,
    token_id: LinearId,
    oracle: &Party,
    participants: &[AbstractParty],
) -> Result<StateAndRef, FlowError> {
    let me = node.party().anonymise();
    let mut all: Vec<AbstractParty> = participants.to_vec();
    if !all.contains(&me) {
        all.insert(0, me);
    }
    let request = DueDiligence::new(token_id, oracle.clone(), all.clone());
    let signers: Vec<_> = all.iter().map(|p| p.owning_key).collect();
    let builder = TransactionBuilder::new(node.notary_party().clone())
        .add_output_state(request.clone())
        .add_command(CommandData::Diligence(DiligenceCommand::Prepare), signers.iter().copied());
    builder.verify(node.verifier())?;
    let mine: Vec<_> = node.keys().filter_mine(signers.iter()).into_iter().collect();
    let stx = builder.sign_initial(node.keys(), &mine)?;
    let done = coordinate(node, DILIGENCE_PREPARE_PROTOCOL, stx, &[]).await?;
    info!(
        tx_id = %done.id().short(),
        request = %request.linear_id,
        token_id = %token_id,
        oracle = %oracle,
        "due diligence prepared"
    );
    output_of::<DueDiligence>(&done)
}

/// A participant co-signs a request only about a token it holds.
fn prepare_check(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    let requests = ctx.ltx.outputs_of::<DueDiligence>();
    let [request] = requests.as_slice() else {
        return Err(FlowError::RejectedTransaction("expected one due diligence request".into()));
    };
    let held = ctx
        .node
        .vault()
        .unconsumed_linear(request.token_id)?
        .and_then(|s| s.get::<UniqueToken>().cloned())
        .is_some_and(|t| ctx.node.keys().is_mine(&t.holder.owning_key));
    if !held {
        return Err(FlowError::RejectedTransaction(format!(
            "we hold no token {} to be diligent about",
            request.token_id
        )));
    }
    Ok(())
}

/// Have the request certified on its own, outside any sale. The other
/// participants are told once it is final.
pub async fn certify_diligence(
    node: &Node,
    request_id: LinearId,
    status: DiligenceStatus,
) -> Result<SignedTransaction, FlowError> {
    let request = find_linear::<DueDiligence>(node, request_id, "due diligence")?;
    let dd = request
        .get::<DueDiligence>()
        .cloned()
        .ok_or_else(|| FlowError::NotFound(format!("due diligence {}", request_id)))?;

    let fresh = ChronoDuration::from_std(node.config().attestation_freshness()).unwrap_or(ChronoDuration::zero());
    let until = node.clock().now() + fresh - ChronoDuration::seconds(1);
    let builder = TransactionBuilder::new(request.state.notary.clone())
        .add_input_state(request)
        .add_command(CommandData::certify(dd.token_id, status), [dd.oracle.owning_key])
        .set_time_window(TimeWindow::until_only(until));
    builder.verify(node.verifier())?;
    let stx = builder.sign_initial(node.keys(), &[])?;
    let sig = request_attestation(node, &dd.oracle, &stx).await?;
    let stx = stx.with_additional_signature(sig);

    let others: Vec<Party> = dd
        .participants
        .iter()
        .filter(|p| !node.keys().is_mine(&p.owning_key))
        .filter_map(|p| node.identity().well_known_party_from_key(&p.owning_key))
        .collect();
    let done = coordinate(node, DILIGENCE_CERTIFY_PROTOCOL, stx, &others).await?;
    info!(
        tx_id = %done.id().short(),
        request = %request_id,
        token_id = %dd.token_id,
        status = %status,
        "due diligence certified"
    );
    Ok(done)
}

/// Withdraw a request. Every participant signs.
pub async fn drop_diligence(node: &Node, request_id: LinearId) -> Result<SignedTransaction, FlowError> {
    let request = find_linear::<DueDiligence>(node, request_id, "due diligence")?;
    let dd = request
        .get::<DueDiligence>()
        .cloned()
        .ok_or_else(|| FlowError::NotFound(format!("due diligence {}", request_id)))?;
    let signers: Vec<_> = dd.participants.iter().map(|p| p.owning_key).collect();
    let builder = TransactionBuilder::new(request.state.notary.clone())
        .add_input_state(request)
        .add_command(CommandData::Diligence(DiligenceCommand::Drop), signers.iter().copied());
    builder.verify(node.verifier())?;
    let mine: Vec<_> = node.keys().filter_mine(signers.iter()).into_iter().collect();
    let stx = builder.sign_initial(node.keys(), &mine)?;
    let done = coordinate(node, DILIGENCE_DROP_PROTOCOL, stx, &[]).await?;
    info!(tx_id = %done.id().short(), request = %request_id, "due diligence dropped");
    Ok(done)
}

fn drop_check(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    let only_drop = ctx.ltx.inputs.len() == 1
        && ctx.ltx.inputs_of::<DueDiligence>().len() == 1
        && ctx.ltx.outputs.is_empty();
    if only_drop {
        Ok(())
    } else {
        Err(FlowError::RejectedTransaction("a drop consumes exactly one request and nothing else".into()))
    }
}

/// Ask `oracle` what it currently holds true about `token_id`.
pub async fn query_diligence(node: &Node, oracle: &Party, token_id: LinearId) -> Result<DiligenceStatus, FlowError> {
    query_fact(node, oracle, token_id).await
}

pub(crate) fn register(node: &Node) {
    node.register_responder(DILIGENCE_PREPARE_PROTOCOL, Arc::new(CoordinatedResponder::new(prepare_check)));
    node.register_responder(DILIGENCE_CERTIFY_PROTOCOL, Arc::new(CoordinatedResponder::new(informed_only)));
    node.register_responder(DILIGENCE_DROP_PROTOCOL, Arc::new(CoordinatedResponder::new(drop_check)));
}
