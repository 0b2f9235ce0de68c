//! # Sales Proposal Contract
//!
//! A proposal lives from `Offer` until it is consumed by `Accept` or
//! `Reject`, whichever is notarised first.
//!
//! ```text
//!   Offer  ─▶ SalesProposal ─┬─ Accept (buyer, before expiration - grace)
//!   (seller, asset as ref)   └─ Reject (buyer any time, or seller from
//!                                       expiration + grace on)
//! ```
//!
//! The windows are enforced twice: the contract checks the declared
//! time window against the proposal's expiration, and the notary checks
//! the window against its clock.

use std::collections::BTreeSet;

use accord_protocol::crypto::PublicKey;
use accord_protocol::ledger::{FungibleToken, SalesProposal, UniqueToken};
use accord_protocol::transaction::{
    require_that, Command, CommandData, LedgerTransaction, ProposalCommand, VerificationError,
};

use crate::registry::Contract;

pub const SALES_PROPOSAL_CONTRACT: &str = "sales-proposal";

#[derive(Debug, Clone, Copy, Default)]
pub struct SalesProposalContract;

fn signers(command: &Command) -> BTreeSet<PublicKey> {
    command.signers.iter().copied().collect()
}

fn only_signer(command: &Command, key: PublicKey) -> bool {
    command.signers == [key]
}

fn verify_offer(tx: &LedgerTransaction, command: &Command) -> Result<(), VerificationError> {
    let outputs = tx.outputs_of::<SalesProposal>();
    require_that(
        tx.inputs_of::<SalesProposal>().is_empty(),
        SALES_PROPOSAL_CONTRACT,
        "an offer consumes no proposal",
    )?;
    require_that(outputs.len() == 1, SALES_PROPOSAL_CONTRACT, "an offer produces one proposal")?;
    require_that(tx.references.len() == 1, SALES_PROPOSAL_CONTRACT, "an offer references one token")?;
    let proposal = outputs[0];
    let reference = &tx.references[0];
    let same_asset = reference.reference == proposal.asset
        && reference
            .get::<UniqueToken>()
            .is_some_and(|t| t.linear_id == proposal.asset_id && t.holder == proposal.seller);
    require_that(
        same_asset,
        SALES_PROPOSAL_CONTRACT,
        "the referenced token must be the offered asset, held by the seller",
    )?;
    require_that(proposal.price.quantity > 0, SALES_PROPOSAL_CONTRACT, "the price must not be zero")?;
    require_that(
        only_signer(command, proposal.seller.owning_key),
        SALES_PROPOSAL_CONTRACT,
        "the seller must be the only signer of an offer",
    )?;
    require_that(
        tx.time_window_until().is_some_and(|until| until <= proposal.acceptable_until()),
        SALES_PROPOSAL_CONTRACT,
        "an offer must be notarised before its expiration",
    )
}

fn verify_accept(tx: &LedgerTransaction, command: &Command) -> Result<(), VerificationError> {
    let inputs = tx.inputs_of::<SalesProposal>();
    require_that(inputs.len() == 1, SALES_PROPOSAL_CONTRACT, "an accept consumes one proposal")?;
    require_that(
        tx.outputs_of::<SalesProposal>().is_empty(),
        SALES_PROPOSAL_CONTRACT,
        "an accept produces no proposal",
    )?;
    let proposal = inputs[0];

    let asset_inputs = tx
        .inputs
        .iter()
        .filter(|s| s.reference == proposal.asset && s.get::<UniqueToken>().is_some())
        .count();
    require_that(asset_inputs == 1, SALES_PROPOSAL_CONTRACT, "the offered asset must be consumed")?;

    let bought: Vec<&UniqueToken> = tx
        .outputs_of::<UniqueToken>()
        .into_iter()
        .filter(|t| t.linear_id == proposal.asset_id)
        .collect();
    require_that(
        bought.len() == 1 && bought[0].holder == proposal.buyer,
        SALES_PROPOSAL_CONTRACT,
        "the asset must end up with the buyer",
    )?;

    let paid = tx
        .outputs_of::<FungibleToken>()
        .into_iter()
        .filter(|t| t.holder == proposal.seller && t.issued == proposal.price.token)
        .try_fold(0u64, |acc, t| acc.checked_add(t.amount));
    require_that(
        paid.is_some_and(|paid| paid >= proposal.price.quantity),
        SALES_PROPOSAL_CONTRACT,
        "the seller must be paid the agreed amount in the agreed token",
    )?;
    require_that(
        only_signer(command, proposal.buyer.owning_key),
        SALES_PROPOSAL_CONTRACT,
        "the buyer must be the only signer of an accept",
    )?;
    require_that(
        tx.time_window_until().is_some_and(|until| until <= proposal.acceptable_until()),
        SALES_PROPOSAL_CONTRACT,
        "an accept must be notarised before the proposal expires",
    )
}

fn verify_reject(tx: &LedgerTransaction, command: &Command) -> Result<(), VerificationError> {
    let inputs = tx.inputs_of::<SalesProposal>();
    require_that(inputs.len() == 1, SALES_PROPOSAL_CONTRACT, "a reject consumes one proposal")?;
    require_that(
        tx.outputs_of::<SalesProposal>().is_empty(),
        SALES_PROPOSAL_CONTRACT,
        "a reject produces no proposal",
    )?;
    let proposal = inputs[0];
    let parties: BTreeSet<PublicKey> = [proposal.seller.owning_key, proposal.buyer.owning_key]
        .into_iter()
        .collect();
    let signed_by = signers(command);
    require_that(
        !signed_by.is_empty() && signed_by.is_subset(&parties),
        SALES_PROPOSAL_CONTRACT,
        "only the seller or the buyer may reject",
    )?;
    if !signed_by.contains(&proposal.buyer.owning_key) {
        require_that(
            tx.time_window_from().is_some_and(|from| from >= proposal.cancellable_from()),
            SALES_PROPOSAL_CONTRACT,
            "the seller can reject only after the proposal has expired",
        )?;
    }
    Ok(())
}

impl Contract for SalesProposalContract {
    fn name(&self) -> &'static str {
        SALES_PROPOSAL_CONTRACT
    }

    fn claims(&self, command: &CommandData) -> bool {
        matches!(command, CommandData::Proposal(_))
    }

    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        let commands = tx.commands_where(|c| self.claims(c));
        let touched = !tx.inputs_of::<SalesProposal>().is_empty() || !tx.outputs_of::<SalesProposal>().is_empty();
        if commands.is_empty() && !touched {
            return Ok(());
        }
        require_that(
            commands.len() == 1,
            SALES_PROPOSAL_CONTRACT,
            "expected exactly one sales proposal command",
        )?;
        let command = commands[0];
        match command.value {
            CommandData::Proposal(ProposalCommand::Offer) => verify_offer(tx, command),
            CommandData::Proposal(ProposalCommand::Accept) => verify_accept(tx, command),
            CommandData::Proposal(ProposalCommand::Reject) => verify_reject(tx, command),
            _ => Ok(()),
        }
    }
}
