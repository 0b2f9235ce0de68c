//! Issue, move and redeem tokens.
//!
//! Issuance and moves are signed by the initiator alone; recipients are
//! informed of the final transaction. A redemption needs the issuer too,
//! and the issuer only co-signs redemptions of its own tokens.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use accord_protocol::crypto::PublicKey;
use accord_protocol::flows::{coordinate, CoordinatedResponder, FlowError, SigningContext};
use accord_protocol::identity::{AbstractParty, Party};
use accord_protocol::ledger::{FungibleToken, IssuedTokenType, LinearId, StateAndRef, TokenType, UniqueToken};
use accord_protocol::network::Node;
use accord_protocol::transaction::{CommandData, SignedTransaction, TokenAction, TransactionBuilder};
use accord_protocol::vault::{SelectionCriteria, TokenSelection};

use super::{find_linear, informed_only, ISSUE_PROTOCOL, MOVE_PROTOCOL, REDEEM_PROTOCOL};

/// Issue fungible `token_type` from this node to each `(holder, amount)`.
pub async fn issue_tokens(
    node: &Node,
    token_type: TokenType,
    holders: &[(AbstractParty, u64)],
) -> Result<SignedTransaction, FlowError> {
    let issued = IssuedTokenType::new(node.party().clone(), token_type);
    let issuer = node.party().owning_key;
    let builder = TransactionBuilder::new(node.notary_party().clone())
        .add_output_states(
            holders
                .iter()
                .map(|(holder, amount)| FungibleToken::new(issued.clone(), *holder, *amount)),
        )
        .add_command(CommandData::token(TokenAction::Issue, issued.clone()), [issuer]);
    builder.verify(node.verifier())?;
    let stx = builder.sign_initial(node.keys(), &[issuer])?;
    let done = coordinate(node, ISSUE_PROTOCOL, stx, &[]).await?;
    info!(tx_id = %done.id().short(), token = %issued, holders = holders.len(), "tokens issued");
    Ok(done)
}

/// Issue one unique token of `token_type` to `holder`.
pub async fn issue_unique_token(
    node: &Node,
    token_type: TokenType,
    holder: AbstractParty,
) -> Result<SignedTransaction, FlowError> {
    let issued = IssuedTokenType::new(node.party().clone(), token_type);
    let issuer = node.party().owning_key;
    let token = UniqueToken::new(issued.clone(), holder);
    let builder = TransactionBuilder::new(node.notary_party().clone())
        .add_output_state(token.clone())
        .add_command(CommandData::token(TokenAction::Issue, issued), [issuer]);
    builder.verify(node.verifier())?;
    let stx = builder.sign_initial(node.keys(), &[issuer])?;
    let done = coordinate(node, ISSUE_PROTOCOL, stx, &[]).await?;
    info!(tx_id = %done.id().short(), token_id = %token.linear_id, holder = %holder, "unique token issued");
    Ok(done)
}

/// One `Move` (or `Redeem`) command per issued type among `inputs`,
/// signed by the holders of that type's inputs.
fn commands_for(inputs: &[StateAndRef], action: TokenAction) -> Vec<(CommandData, BTreeSet<PublicKey>)> {
    let mut by_type: BTreeMap<IssuedTokenType, BTreeSet<PublicKey>> = BTreeMap::new();
    for input in inputs {
        if let Some(token) = input.get::<FungibleToken>() {
            by_type
                .entry(token.issued.clone())
                .or_default()
                .insert(token.holder.owning_key);
        }
    }
    by_type
        .into_iter()
        .map(|(issued, holders)| (CommandData::token(action, issued), holders))
        .collect()
}

/// Pay each `(recipient, amount)` from this node's holdings of
/// `token_type`, optionally restricted to one issuer. Holdings under any
/// of the node's keys are eligible. Change comes back to this node's legal
/// identity.
pub async fn move_tokens(
    node: &Node,
    token_type: TokenType,
    issuer: Option<&Party>,
    recipients: &[(AbstractParty, u64)],
) -> Result<SignedTransaction, FlowError> {
    let me = node.party().anonymise();
    let mut criteria = SelectionCriteria::new(token_type).held_by_us();
    if let Some(issuer) = issuer {
        criteria = criteria.issued_by(issuer.owning_key);
    }
    let generated = TokenSelection::new(node.vault())
        .with_page_size(node.config().selection_page_size)
        .generate_move(recipients, me, &criteria)?;

    let mut builder = TransactionBuilder::new(node.notary_party().clone())
        .add_input_states(generated.inputs.iter().cloned())
        .add_output_states(generated.outputs);
    let mut signing = BTreeSet::new();
    for (command, holders) in commands_for(&generated.inputs, TokenAction::Move) {
        signing.extend(holders.iter().copied());
        builder = builder.add_command(command, holders);
    }
    builder.verify(node.verifier())?;
    let signing: Vec<PublicKey> = signing.into_iter().collect();
    let stx = builder.sign_initial(node.keys(), &signing)?;
    let done = coordinate(node, MOVE_PROTOCOL, stx, &[]).await?;
    info!(
        tx_id = %done.id().short(),
        inputs = generated.inputs.len(),
        recipients = recipients.len(),
        "tokens moved"
    );
    Ok(done)
}

/// Move the unique token `token_id` to `new_holder`.
pub async fn move_unique(node: &Node, token_id: LinearId, new_holder: AbstractParty) -> Result<SignedTransaction, FlowError> {
    let current = find_linear::<UniqueToken>(node, token_id, "unique token")?;
    move_unique_state(node, current, new_holder).await
}

/// Move the given version of a unique token. Consuming a stale version
/// fails at the notary.
pub async fn move_unique_state(
    node: &Node,
    current: StateAndRef,
    new_holder: AbstractParty,
) -> Result<SignedTransaction, FlowError> {
    let token = current
        .get::<UniqueToken>()
        .cloned()
        .ok_or_else(|| FlowError::ValidationFailure(format!("{} is not a unique token", current.reference)))?;
    let holder = token.holder.owning_key;
    if !node.keys().is_mine(&holder) {
        return Err(FlowError::ValidationFailure(format!(
            "unique token {} is not held by us",
            token.linear_id
        )));
    }
    let builder = TransactionBuilder::new(current.state.notary.clone())
        .add_input_state(current)
        .add_output_state(token.with_new_holder(new_holder))
        .add_command(CommandData::token(TokenAction::Move, token.issued.clone()), [holder]);
    builder.verify(node.verifier())?;
    let stx = builder.sign_initial(node.keys(), &[holder])?;
    let done = coordinate(node, MOVE_PROTOCOL, stx, &[]).await?;
    info!(tx_id = %done.id().short(), token_id = %token.linear_id, to = %new_holder, "unique token moved");
    Ok(done)
}

/// Redeem `amount` of `token_type` issued by `issuer` from this node's
/// holdings under any of its keys. The issuer co-signs.
pub async fn redeem_tokens(
    node: &Node,
    token_type: TokenType,
    issuer: &Party,
    amount: u64,
) -> Result<SignedTransaction, FlowError> {
    let me = node.party().anonymise();
    let criteria = SelectionCriteria::new(token_type.clone())
        .issued_by(issuer.owning_key)
        .held_by_us();
    let selected = TokenSelection::new(node.vault())
        .with_page_size(node.config().selection_page_size)
        .select(amount, &criteria)?;
    let inputs = selected.states();
    let change = selected.sum() - amount;

    let issued = IssuedTokenType::new(issuer.clone(), token_type);
    let mut builder = TransactionBuilder::new(node.notary_party().clone()).add_input_states(inputs.iter().cloned());
    if change > 0 {
        builder = builder.add_output_state(FungibleToken::new(issued.clone(), me, change));
    }
    let mut holders = BTreeSet::new();
    for (command, keys) in commands_for(&inputs, TokenAction::Redeem) {
        holders.extend(keys.iter().copied());
        let mut signers = keys;
        signers.insert(issuer.owning_key);
        builder = builder.add_command(command, signers);
    }
    builder.verify(node.verifier())?;
    let holders: Vec<PublicKey> = holders.into_iter().collect();
    let stx = builder.sign_initial(node.keys(), &holders)?;
    let done = coordinate(node, REDEEM_PROTOCOL, stx, &[]).await?;
    info!(tx_id = %done.id().short(), token = %issued, amount, change, "tokens redeemed");
    Ok(done)
}

/// The issuer co-signs only redemptions, and only of what it issued.
fn redeem_check(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    let me = ctx.node.party();
    for command in &ctx.ltx.commands {
        match &command.value {
            CommandData::Token {
                action: TokenAction::Redeem,
                token,
            } if &token.issuer == me => {}
            other => {
                return Err(FlowError::RejectedTransaction(format!(
                    "{} may not be co-signed by the issuer",
                    other
                )))
            }
        }
    }
    if ctx.ltx.inputs_of::<FungibleToken>().iter().any(|t| ctx.node.keys().is_mine(&t.holder.owning_key)) {
        return Err(FlowError::RejectedTransaction("redemption would consume our own holdings".into()));
    }
    Ok(())
}

pub(crate) fn register(node: &Node) {
    node.register_responder(ISSUE_PROTOCOL, Arc::new(CoordinatedResponder::new(informed_only)));
    node.register_responder(MOVE_PROTOCOL, Arc::new(CoordinatedResponder::new(informed_only)));
    node.register_responder(REDEEM_PROTOCOL, Arc::new(CoordinatedResponder::new(redeem_check)));
}
