//! Create and update asset descriptions.
//!
//! The maintainer signs alone. Observers passed by the caller receive the
//! notarised transaction and track the description, so tokens pointing at
//! it resolve on their side too.

use std::sync::Arc;
use tracing::info;

use accord_protocol::flows::{coordinate, CoordinatedResponder, FlowError, SigningContext};
use accord_protocol::identity::Party;
use accord_protocol::ledger::{AssetType, LinearId, StateAndRef};
use accord_protocol::network::Node;
use accord_protocol::transaction::{AssetTypeCommand, CommandData, TransactionBuilder};

use super::{find_linear, output_of, ASSET_TYPE_CREATE_PROTOCOL, ASSET_TYPE_UPDATE_PROTOCOL};

/// Publish a new description maintained by this node.
pub async fn create_asset_type(
    node: &Node,
    identifier: &str,
    make: &str,
    mileage: u64,
    list_price: u64,
    observers: &[Party],
) -> Result<StateAndRef, FlowError> {
    let me = node.party().clone();
    let asset = AssetType::new(vec![me.clone()], identifier, make, mileage, list_price);
    let builder = TransactionBuilder::new(node.notary_party().clone())
        .add_output_state(asset.clone())
        .add_command(CommandData::AssetType(AssetTypeCommand::Create), [me.owning_key]);
    builder.verify(node.verifier())?;
    let stx = builder.sign_initial(node.keys(), &[me.owning_key])?;
    let done = coordinate(node, ASSET_TYPE_CREATE_PROTOCOL, stx, observers).await?;
    info!(
        tx_id = %done.id().short(),
        asset_type = %asset.linear_id,
        identifier,
        observers = observers.len(),
        "asset type created"
    );
    output_of::<AssetType>(&done)
}

/// Replace the current description `id` with `change` applied to it.
pub async fn update_asset_type(
    node: &Node,
    id: LinearId,
    change: impl FnOnce(&mut AssetType),
    observers: &[Party],
) -> Result<StateAndRef, FlowError> {
    let current = find_linear::<AssetType>(node, id, "asset type")?;
    let before = current
        .get::<AssetType>()
        .cloned()
        .ok_or_else(|| FlowError::NotFound(format!("asset type {}", id)))?;
    let mut after = before.clone();
    change(&mut after);

    let signers: Vec<_> = before.maintainers.iter().map(|p| p.owning_key).collect();
    let builder = TransactionBuilder::new(current.state.notary.clone())
        .add_input_state(current)
        .add_output_state(after)
        .add_command(CommandData::AssetType(AssetTypeCommand::Update), signers.iter().copied());
    builder.verify(node.verifier())?;
    let mine: Vec<_> = node.keys().filter_mine(signers.iter()).into_iter().collect();
    let stx = builder.sign_initial(node.keys(), &mine)?;
    let done = coordinate(node, ASSET_TYPE_UPDATE_PROTOCOL, stx, observers).await?;
    info!(tx_id = %done.id().short(), asset_type = %id, "asset type updated");
    output_of::<AssetType>(&done)
}

/// Co-maintainers sign only changes to descriptions.
fn maintainer_check(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    let foreign = ctx
        .ltx
        .commands
        .iter()
        .find(|c| !matches!(c.value, CommandData::AssetType(_)));
    match foreign {
        Some(command) => Err(FlowError::RejectedTransaction(format!(
            "{} has no place in an asset type change",
            command.value
        ))),
        None => Ok(()),
    }
}

pub(crate) fn register(node: &Node) {
    node.register_responder(
        ASSET_TYPE_CREATE_PROTOCOL,
        Arc::new(CoordinatedResponder::new(maintainer_check).observing()),
    );
    node.register_responder(
        ASSET_TYPE_UPDATE_PROTOCOL,
        Arc::new(CoordinatedResponder::new(maintainer_check).observing()),
    );
}
