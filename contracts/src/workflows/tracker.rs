//! # Sales Proposal Tracker
//!
//! A buyer holding a proposal for a token should see the latest version
//! of the asset description the token points at. The seller's node keeps
//! an index of its open proposals by asset description and forwards every
//! update of a tracked description to the buyers:
//!
//! ```text
//!   vault.updates() ──▶ proposal produced, we sell?   track (asset type → buyer)
//!                   ├─▶ proposal consumed?            untrack
//!                   └─▶ asset type replaced, tracked? inform each buyer
//! ```
//!
//! Like the expiration scheduler, the index lives in memory and is
//! rebuilt from the vault on start.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use accord_protocol::crypto::SecureHash;
use accord_protocol::flows::{receive_inform, send_inform, FlowError};
use accord_protocol::identity::AbstractParty;
use accord_protocol::ledger::{AssetType, LinearId, SalesProposal, StateAndRef, StateType, UniqueToken};
use accord_protocol::network::{FlowResponder, Node, Session};
use accord_protocol::vault::{QueryCriteria, VaultError, VaultUpdate};

use super::sale::asset_type_of;
use super::INFORM_BUYER_PROTOCOL;

type Index = HashMap<LinearId, HashMap<LinearId, AbstractParty>>;

pub struct SalesProposalService {
    node: Arc<Node>,
    /// Asset description id → proposal id → buyer.
    tracked: Mutex<Index>,
    shutdown: watch::Sender<bool>,
}

impl SalesProposalService {
    pub fn new(node: Arc<Node>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            node,
            tracked: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Rebuild the index from the vault and start following updates.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, VaultError> {
        let updates = self.node.vault().updates();
        self.rederive()?;
        info!(party = %self.node.party(), tracked = self.tracked.lock().len(), "proposal tracker starting");
        let service = Arc::clone(self);
        Ok(tokio::spawn(async move { service.listen(updates).await }))
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Buyers with an open proposal for a token of `asset_type`.
    pub fn tracked_buyers(&self, asset_type: &LinearId) -> Vec<AbstractParty> {
        self.tracked
            .lock()
            .get(asset_type)
            .map(|buyers| buyers.values().copied().collect())
            .unwrap_or_default()
    }

    fn rederive(&self) -> Result<(), VaultError> {
        let open = self
            .node
            .vault()
            .query_all(&QueryCriteria::unconsumed().of_type(StateType::Proposal))?;
        let mut index = Index::new();
        for sar in &open {
            if let Some((asset_type, proposal)) = self.trackable(sar)? {
                index
                    .entry(asset_type)
                    .or_default()
                    .insert(proposal.linear_id, proposal.buyer);
            }
        }
        *self.tracked.lock() = index;
        Ok(())
    }

    /// The asset description behind a proposal we are selling under.
    fn trackable(&self, sar: &StateAndRef) -> Result<Option<(LinearId, SalesProposal)>, VaultError> {
        let Some(proposal) = sar.get::<SalesProposal>() else {
            return Ok(None);
        };
        if !self.node.keys().is_mine(&proposal.seller.owning_key) {
            return Ok(None);
        }
        let asset_type = self
            .node
            .vault()
            .state(&proposal.asset)?
            .and_then(|asset| asset.get::<UniqueToken>().and_then(asset_type_of));
        Ok(asset_type.map(|id| (id, proposal.clone())))
    }

    fn apply(&self, update: &VaultUpdate) -> Result<(), VaultError> {
        for consumed in &update.consumed {
            if let Some(proposal) = consumed.get::<SalesProposal>() {
                let mut index = self.tracked.lock();
                index.retain(|_, buyers| {
                    buyers.remove(&proposal.linear_id);
                    !buyers.is_empty()
                });
            }
        }
        for produced in &update.produced {
            if let Some((asset_type, proposal)) = self.trackable(produced)? {
                debug!(proposal = %proposal.linear_id, asset_type = %asset_type, "tracking proposal");
                self.tracked
                    .lock()
                    .entry(asset_type)
                    .or_default()
                    .insert(proposal.linear_id, proposal.buyer);
            }
        }

        let replaced = update.produced.iter().filter_map(|p| p.get::<AssetType>()).filter(|after| {
            update
                .consumed
                .iter()
                .any(|c| c.get::<AssetType>().is_some_and(|before| before.linear_id == after.linear_id))
        });
        for asset in replaced {
            let buyers = self.tracked_buyers(&asset.linear_id);
            if buyers.is_empty() {
                continue;
            }
            info!(asset_type = %asset.linear_id, buyers = buyers.len(), "forwarding asset description update");
            self.forward(update.tx_id, buyers);
        }
        Ok(())
    }

    fn forward(&self, tx_id: SecureHash, buyers: Vec<AbstractParty>) {
        let node = Arc::clone(&self.node);
        tokio::spawn(async move {
            let outcomes = join_all(buyers.iter().map(|buyer| inform(&node, tx_id, buyer))).await;
            for (buyer, outcome) in buyers.iter().zip(outcomes) {
                if let Err(e) = outcome {
                    warn!(party = %node.party(), buyer = %buyer, error = %e, "failed to forward asset description");
                }
            }
        });
    }

    async fn listen(self: Arc<Self>, mut updates: Receiver<VaultUpdate>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(update) => {
                        if let Err(e) = self.apply(&update) {
                            warn!(party = %self.node.party(), error = %e, "failed to apply vault update");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(party = %self.node.party(), skipped, "tracker lagged behind vault updates, re-deriving");
                        if let Err(e) = self.rederive() {
                            warn!(party = %self.node.party(), error = %e, "failed to re-derive tracked proposals");
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }
}

async fn inform(node: &Node, tx_id: SecureHash, buyer: &AbstractParty) -> Result<(), FlowError> {
    let stx = node
        .vault()
        .transaction(&tx_id)?
        .ok_or_else(|| FlowError::NotFound(format!("transaction {}", tx_id.short())))?;
    let host = node.identity().require_host(&buyer.owning_key)?;
    let mut session = node.initiate(&host, INFORM_BUYER_PROTOCOL).await?;
    send_inform(node, &mut session, &stx).await
}

impl std::fmt::Debug for SalesProposalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesProposalService")
            .field("party", self.node.party())
            .field("asset_types", &self.tracked.lock().len())
            .finish()
    }
}

struct InformBuyerResponder;

#[async_trait::async_trait]
impl FlowResponder for InformBuyerResponder {
    async fn respond(&self, node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
        receive_inform(&node, session).await.map(|_| ())
    }
}

pub(crate) fn register(node: &Node) {
    node.register_responder(INFORM_BUYER_PROTOCOL, Arc::new(InformBuyerResponder));
}
