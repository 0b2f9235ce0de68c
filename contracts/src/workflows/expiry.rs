use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use accord_protocol::flows::FlowError;
use accord_protocol::ledger::{ActivityKind, ScheduledActivity};
use accord_protocol::network::Node;
use accord_protocol::scheduler::ActivityRunner;

use super::sale::reject_sale;

/// Runs due activities for the seller: an expired proposal is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalExpiry;

#[async_trait]
impl ActivityRunner for ProposalExpiry {
    async fn run(&self, node: Arc<Node>, activity: ScheduledActivity) -> Result<(), FlowError> {
        match activity.activity {
            ActivityKind::ExpireProposal { linear_id } => {
                let done = reject_sale(&node, linear_id).await?;
                info!(
                    tx_id = %done.id().short(),
                    proposal = %linear_id,
                    "expired proposal cancelled"
                );
                Ok(())
            }
        }
    }
}
