//! # Sale Workflows
//!
//! ```text
//!   seller                         buyer
//!   offer_sale ── proposal ──────▶ (informed, plus the asset description)
//!                                  accept_sale
//!     ◀──────── Accept tx ──────── proposal + asset + payment [+ diligence]
//!   accept_check, sign               │
//!                                    └─ attestation from the oracle first
//!     ◀──────────── final tx ───────▶
//! ```
//!
//! Either side may reject. The buyer can do so at any time; the seller
//! only once the proposal has expired, which its expiration scheduler
//! does on its own.

use chrono::Duration as ChronoDuration;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use accord_protocol::attestation::request_attestation;
use accord_protocol::clock::Clock;
use accord_protocol::crypto::PublicKey;
use accord_protocol::flows::{coordinate, send_inform, CoordinatedResponder, FlowError, SigningContext};
use accord_protocol::identity::AbstractParty;
use accord_protocol::ledger::{
    DiligenceStatus, DueDiligence, FungibleToken, IssuedAmount, LinearId, SalesProposal, StateAndRef,
    TokenType, UniqueToken,
};
use accord_protocol::network::Node;
use accord_protocol::transaction::{
    CommandData, DiligenceCommand, ProposalCommand, SignedTransaction, TimeWindow, TokenAction, TransactionBuilder,
};
use accord_protocol::vault::{SelectionCriteria, TokenSelection};

use super::{find_linear, informed_only, output_of, ACCEPT_PROTOCOL, INFORM_BUYER_PROTOCOL, OFFER_PROTOCOL, REJECT_PROTOCOL};

/// A due-diligence request to certify as part of an accept, and the
/// status the buyer expects the oracle to vouch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiligenceClaim {
    pub request: LinearId,
    pub status: DiligenceStatus,
}

impl DiligenceClaim {
    pub fn new(request: LinearId, status: DiligenceStatus) -> Self {
        Self { request, status }
    }
}

// ---------------------------------------------------------------------------
// Offer
// ---------------------------------------------------------------------------

/// Offer the unique token `asset_id` to `buyer` for `price` until
/// `expiration`. Returns the proposal.
///
/// When the token points at an asset description this node holds, the
/// buyer is also sent the description.
pub async fn offer_sale(
    node: &Node,
    asset_id: LinearId,
    buyer: AbstractParty,
    price: IssuedAmount,
    expiration: chrono::DateTime<chrono::Utc>,
) -> Result<StateAndRef, FlowError> {
    let asset = find_linear::<UniqueToken>(node, asset_id, "unique token")?;
    let token = asset
        .get::<UniqueToken>()
        .cloned()
        .ok_or_else(|| FlowError::NotFound(format!("unique token {}", asset_id)))?;
    let seller = token.holder;
    if !node.keys().is_mine(&seller.owning_key) {
        return Err(FlowError::ValidationFailure(format!("unique token {} is not held by us", asset_id)));
    }

    let proposal = SalesProposal {
        linear_id: LinearId::new(),
        asset: asset.reference,
        asset_id,
        seller,
        buyer,
        price,
        expiration,
    };
    let builder = TransactionBuilder::new(node.notary_party().clone())
        .add_reference_state(asset)
        .add_output_state(proposal.clone())
        .add_command(CommandData::Proposal(ProposalCommand::Offer), [seller.owning_key])
        .set_time_window(TimeWindow::until_only(proposal.acceptable_until()));
    builder.verify(node.verifier())?;
    let stx = builder.sign_initial(node.keys(), &[seller.owning_key])?;
    let done = coordinate(node, OFFER_PROTOCOL, stx, &[]).await?;
    info!(
        tx_id = %done.id().short(),
        proposal = %proposal.linear_id,
        asset = %asset_id,
        buyer = %buyer,
        price = proposal.price.quantity,
        expiration = %proposal.expiration,
        "sale offered"
    );

    if let Some(asset_type) = asset_type_of(&token) {
        share_asset_type(node, asset_type, &buyer).await?;
    }
    output_of::<SalesProposal>(&done)
}

/// Send the buyer the transaction that produced the current version of
/// `asset_type`, if we have it.
pub(crate) async fn share_asset_type(node: &Node, asset_type: LinearId, buyer: &AbstractParty) -> Result<(), FlowError> {
    let Some(current) = node.vault().unconsumed_linear(asset_type)? else {
        debug!(asset_type = %asset_type, "no asset description to share");
        return Ok(());
    };
    let Some(stx) = node.vault().transaction(&current.reference.txhash)? else {
        return Ok(());
    };
    let host = node.identity().require_host(&buyer.owning_key)?;
    if &host == node.party() {
        return Ok(());
    }
    let mut session = node.initiate(&host, INFORM_BUYER_PROTOCOL).await?;
    send_inform(node, &mut session, &stx).await?;
    debug!(asset_type = %asset_type, buyer = %host, "asset description shared");
    Ok(())
}

// ---------------------------------------------------------------------------
// Accept
// ---------------------------------------------------------------------------

/// Accept the current version of proposal `proposal_id`.
pub async fn accept_sale(
    node: &Node,
    proposal_id: LinearId,
    diligence: Option<DiligenceClaim>,
) -> Result<SignedTransaction, FlowError> {
    let proposal = find_linear::<SalesProposal>(node, proposal_id, "sales proposal")?;
    accept_proposal(node, proposal, diligence).await
}

/// Accept the given version of a proposal.
///
/// The transaction consumes the proposal and the asset, pays the seller
/// from this node's holdings of the price token and, with a claim,
/// certifies the diligence request inside the same transaction.
pub async fn accept_proposal(
    node: &Node,
    proposal_state: StateAndRef,
    diligence: Option<DiligenceClaim>,
) -> Result<SignedTransaction, FlowError> {
    let proposal = proposal_state
        .get::<SalesProposal>()
        .cloned()
        .ok_or_else(|| FlowError::ValidationFailure(format!("{} is not a proposal", proposal_state.reference)))?;
    let buyer = proposal.buyer.owning_key;
    if !node.keys().is_mine(&buyer) {
        return Err(FlowError::ValidationFailure(format!(
            "proposal {} is not addressed to us",
            proposal.linear_id
        )));
    }
    let asset = node
        .vault()
        .state(&proposal.asset)?
        .ok_or_else(|| FlowError::NotFound(format!("offered asset {}", proposal.asset)))?;
    let token = asset
        .get::<UniqueToken>()
        .cloned()
        .ok_or_else(|| FlowError::ValidationFailure(format!("{} is not a unique token", proposal.asset)))?;

    let mut until = proposal.acceptable_until();
    let mut builder = TransactionBuilder::new(proposal_state.state.notary.clone())
        .add_input_state(proposal_state.clone())
        .add_command(CommandData::Proposal(ProposalCommand::Accept), [buyer]);

    let mut oracle = None;
    if let Some(claim) = diligence {
        let request = find_linear::<DueDiligence>(node, claim.request, "due diligence")?;
        let dd = request
            .get::<DueDiligence>()
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("due diligence {}", claim.request)))?;
        if dd.token_id != proposal.asset_id {
            return Err(FlowError::ValidationFailure(format!(
                "due diligence {} is about {}, not {}",
                claim.request, dd.token_id, proposal.asset_id
            )));
        }
        // The oracle vouches only for a window that closes soon.
        let fresh = ChronoDuration::from_std(node.config().attestation_freshness())
            .unwrap_or(ChronoDuration::zero());
        let attested_until = node.clock().now() + fresh - ChronoDuration::seconds(1);
        if attested_until < until {
            until = attested_until;
        }
        builder = builder
            .add_input_state(request)
            .add_command(CommandData::certify(dd.token_id, claim.status), [dd.oracle.owning_key]);
        oracle = Some(dd.oracle);
    }

    builder = builder
        .add_input_state(asset)
        .add_output_state(token.with_new_holder(proposal.buyer))
        .add_command(
            CommandData::token(TokenAction::Move, token.issued.clone()),
            [token.holder.owning_key],
        );

    let criteria = SelectionCriteria::new(proposal.price.token.token_type.clone())
        .issued_by(proposal.price.token.issuer.owning_key)
        .held_by_us();
    let payment = TokenSelection::new(node.vault())
        .with_page_size(node.config().selection_page_size)
        .generate_move(&[(proposal.seller, proposal.price.quantity)], proposal.buyer, &criteria)?;
    let mut payers: BTreeSet<PublicKey> = BTreeSet::new();
    for input in &payment.inputs {
        if let Some(t) = input.get::<FungibleToken>() {
            payers.insert(t.holder.owning_key);
        }
    }
    builder = builder
        .add_input_states(payment.inputs.iter().cloned())
        .add_output_states(payment.outputs)
        .add_command(
            CommandData::token(TokenAction::Move, proposal.price.token.clone()),
            payers.iter().copied(),
        )
        .set_time_window(TimeWindow::until_only(until));

    builder.verify(node.verifier())?;
    payers.insert(buyer);
    let signing: Vec<PublicKey> = payers.into_iter().collect();
    let mut stx = builder.sign_initial(node.keys(), &signing)?;

    if let Some(oracle) = &oracle {
        let sig = request_attestation(node, oracle, &stx).await?;
        stx = stx.with_additional_signature(sig);
        debug!(tx_id = %stx.id().short(), oracle = %oracle, "attestation attached");
    }

    let done = coordinate(node, ACCEPT_PROTOCOL, stx, &[]).await?;
    info!(
        tx_id = %done.id().short(),
        proposal = %proposal.linear_id,
        asset = %proposal.asset_id,
        price = proposal.price.quantity,
        attested = oracle.is_some(),
        "sale accepted"
    );
    Ok(done)
}

/// The seller's review of an accept: it must give up exactly the offered
/// asset, and nothing of ours beyond it.
fn accept_check(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    let reject = |reason: String| Err(FlowError::RejectedTransaction(reason));
    let tx = ctx.ltx;

    let accepts = tx.commands_where(|c| matches!(c, CommandData::Proposal(ProposalCommand::Accept)));
    let proposal_commands = tx.commands_where(|c| matches!(c, CommandData::Proposal(_)));
    if accepts.len() != 1 || proposal_commands.len() != 1 {
        return reject("expected exactly one accept".into());
    }

    let unexpected_input = tx.inputs.iter().find(|s| {
        s.get::<SalesProposal>().is_none()
            && s.get::<UniqueToken>().is_none()
            && s.get::<FungibleToken>().is_none()
            && s.get::<DueDiligence>().is_none()
    });
    if let Some(input) = unexpected_input {
        return reject(format!("unexpected input {}", input.reference));
    }

    let proposals = tx.inputs_of::<SalesProposal>();
    let uniques = tx.inputs_of::<UniqueToken>();
    if proposals.len() != 1 || uniques.len() != 1 {
        return reject("expected one proposal and one asset".into());
    }
    let proposal = proposals[0];
    if uniques[0].linear_id != proposal.asset_id {
        return reject(format!("asset {} is not the one offered", uniques[0].linear_id));
    }

    let diligence: Vec<_> = tx.commands_where(|c| matches!(c, CommandData::Diligence(_)));
    match diligence.as_slice() {
        [] => {}
        [command] => match &command.value {
            CommandData::Diligence(DiligenceCommand::Certify { token_id, .. }) if *token_id == proposal.asset_id => {}
            other => return reject(format!("{} does not belong in this sale", other)),
        },
        _ => return reject("more than one diligence command".into()),
    }

    let expected: BTreeSet<PublicKey> = [proposal.seller.owning_key].into_iter().collect();
    if ctx.my_keys != &expected {
        return reject("we are asked to sign with keys other than the seller's".into());
    }
    if tx
        .inputs_of::<FungibleToken>()
        .iter()
        .any(|t| ctx.node.keys().is_mine(&t.holder.owning_key))
    {
        return reject("the transaction spends our money".into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reject
// ---------------------------------------------------------------------------

/// Reject proposal `proposal_id`. The buyer may do this at any time; the
/// seller only after the proposal has expired.
pub async fn reject_sale(node: &Node, proposal_id: LinearId) -> Result<SignedTransaction, FlowError> {
    let current = find_linear::<SalesProposal>(node, proposal_id, "sales proposal")?;
    let proposal = current
        .get::<SalesProposal>()
        .cloned()
        .ok_or_else(|| FlowError::NotFound(format!("sales proposal {}", proposal_id)))?;

    let mut builder = TransactionBuilder::new(current.state.notary.clone()).add_input_state(current);
    let (signer, counterparty) = if node.keys().is_mine(&proposal.buyer.owning_key) {
        (proposal.buyer.owning_key, proposal.seller.owning_key)
    } else if node.keys().is_mine(&proposal.seller.owning_key) {
        builder = builder.set_time_window(TimeWindow::from_only(node.clock().now()));
        (proposal.seller.owning_key, proposal.buyer.owning_key)
    } else {
        return Err(FlowError::ValidationFailure(format!(
            "proposal {} is neither ours to sell nor to buy",
            proposal_id
        )));
    };
    builder = builder.add_command(CommandData::Proposal(ProposalCommand::Reject), [signer]);

    if let Err(e) = builder.verify(node.verifier()) {
        warn!(proposal = %proposal_id, error = %e, "rejection refused locally");
        return Err(e.into());
    }
    let stx = builder.sign_initial(node.keys(), &[signer])?;
    let observers: Vec<_> = node.identity().well_known_party_from_key(&counterparty).into_iter().collect();
    let done = coordinate(node, REJECT_PROTOCOL, stx, &observers).await?;
    info!(tx_id = %done.id().short(), proposal = %proposal_id, "sale rejected");
    Ok(done)
}

pub(crate) fn register(node: &Node) {
    node.register_responder(OFFER_PROTOCOL, Arc::new(CoordinatedResponder::new(informed_only)));
    node.register_responder(ACCEPT_PROTOCOL, Arc::new(CoordinatedResponder::new(accept_check)));
    node.register_responder(REJECT_PROTOCOL, Arc::new(CoordinatedResponder::new(informed_only)));
}

/// The asset description a proposal's token points at, if any.
pub(crate) fn asset_type_of(token: &UniqueToken) -> Option<LinearId> {
    match &token.issued.token_type {
        TokenType::Pointer { asset_type } => Some(*asset_type),
        TokenType::Fixed { .. } => None,
    }
}
