//! # Workflows
//!
//! The application's protocols, each a thin layer over the core
//! coordinator: build a transaction, verify it, sign what is ours, and
//! hand it to [`coordinate`](accord_protocol::flows::coordinate). The
//! responding side is a [`CoordinatedResponder`] with a check that
//! decides whether this node is willing to co-sign.
//!
//! ```text
//! tokens.rs      — issue, move and redeem fungible and unique tokens
//! asset_types.rs — create and update evolvable asset descriptions
//! sale.rs        — offer, accept and reject sale proposals
//! diligence.rs   — prepare, certify, drop and query due diligence
//! tracker.rs     — keeps buyers informed of asset description updates
//! expiry.rs      — cancels expired proposals on the seller's behalf
//! ```

pub mod asset_types;
pub mod diligence;
pub mod expiry;
pub mod sale;
pub mod tokens;
pub mod tracker;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use accord_protocol::flows::{FlowError, SigningContext};
use accord_protocol::ledger::{LinearId, StateAndRef, StateKind};
use accord_protocol::network::Node;
use accord_protocol::scheduler::ExpirationScheduler;
use accord_protocol::transaction::SignedTransaction;
use accord_protocol::vault::VaultError;

pub use asset_types::{create_asset_type, update_asset_type};
pub use diligence::{certify_diligence, drop_diligence, prepare_diligence, query_diligence};
pub use expiry::ProposalExpiry;
pub use sale::{accept_proposal, accept_sale, offer_sale, reject_sale, DiligenceClaim};
pub use tokens::{issue_tokens, issue_unique_token, move_tokens, move_unique, move_unique_state, redeem_tokens};
pub use tracker::SalesProposalService;

// ---------------------------------------------------------------------------
// Protocol names
// ---------------------------------------------------------------------------

pub const ISSUE_PROTOCOL: &str = "token.issue";
pub const MOVE_PROTOCOL: &str = "token.move";
pub const REDEEM_PROTOCOL: &str = "token.redeem";
pub const ASSET_TYPE_CREATE_PROTOCOL: &str = "asset-type.create";
pub const ASSET_TYPE_UPDATE_PROTOCOL: &str = "asset-type.update";
pub const OFFER_PROTOCOL: &str = "sale.offer";
pub const ACCEPT_PROTOCOL: &str = "sale.accept";
pub const REJECT_PROTOCOL: &str = "sale.reject";
pub const DILIGENCE_PREPARE_PROTOCOL: &str = "diligence.prepare";
pub const DILIGENCE_CERTIFY_PROTOCOL: &str = "diligence.certify";
pub const DILIGENCE_DROP_PROTOCOL: &str = "diligence.drop";
pub const INFORM_BUYER_PROTOCOL: &str = "inform.token-buyer";

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Responder check for protocols where only the initiator signs. Being
/// asked to sign under one of them is refused.
pub(crate) fn informed_only(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    Err(FlowError::RejectedTransaction(format!(
        "{} asked us to co-sign a transaction we only observe",
        ctx.counterparty
    )))
}

/// The current version of a linear record of type `T`.
pub(crate) fn find_linear<T: StateKind>(node: &Node, id: LinearId, what: &str) -> Result<StateAndRef, FlowError> {
    node.vault()
        .unconsumed_linear(id)?
        .filter(|s| s.get::<T>().is_some())
        .ok_or_else(|| FlowError::NotFound(format!("{} {}", what, id)))
}

/// The first output of type `T` in `stx`, with its reference.
pub(crate) fn output_of<T: StateKind>(stx: &SignedTransaction) -> Result<StateAndRef, FlowError> {
    stx.tx()
        .outputs
        .iter()
        .position(|o| o.get::<T>().is_some())
        .map(|index| StateAndRef::new(stx.tx().outputs[index].clone(), stx.tx().out_ref(index)))
        .ok_or_else(|| FlowError::NotFound(format!("no matching output in {}", stx.id().short())))
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

/// Background services started by [`install`].
#[derive(Debug)]
pub struct AppServices {
    pub scheduler: Option<Arc<ExpirationScheduler>>,
    pub proposals: Arc<SalesProposalService>,
    handles: Vec<JoinHandle<()>>,
}

impl AppServices {
    pub fn stop(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        self.proposals.stop();
    }

    pub fn handles(&self) -> &[JoinHandle<()>] {
        &self.handles
    }
}

/// Register every workflow responder on `node` and start its background
/// services. The expiration scheduler only runs when the node's config
/// enables it.
pub fn install(node: &Arc<Node>) -> Result<AppServices, VaultError> {
    tokens::register(node);
    asset_types::register(node);
    sale::register(node);
    diligence::register(node);
    tracker::register(node);

    let mut handles = Vec::new();
    let scheduler = if node.config().scheduler_enabled {
        let scheduler = ExpirationScheduler::new(Arc::clone(node), Arc::new(ProposalExpiry));
        handles.extend(scheduler.start()?);
        Some(scheduler)
    } else {
        None
    };
    let proposals = SalesProposalService::new(Arc::clone(node));
    handles.push(proposals.start()?);

    info!(
        party = %node.party(),
        scheduler = scheduler.is_some(),
        "workflows installed"
    );
    Ok(AppServices {
        scheduler,
        proposals,
        handles,
    })
}
