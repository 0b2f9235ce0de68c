//! Non-token records: evolvable asset descriptions, sale proposals and
//! due-diligence requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::{ActivityKind, LinearId, ScheduledActivity, StateRef};
use super::token::IssuedAmount;
use crate::config::EXPIRATION_GRACE;
use crate::identity::{AbstractParty, Party};

/// An evolvable description of a physical asset (a car, say). Unique
/// tokens point to it by linear id, so updating the description does not
/// touch the tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetType {
    pub linear_id: LinearId,
    pub maintainers: Vec<Party>,
    /// External identifier, e.g. a VIN.
    pub identifier: String,
    pub make: String,
    pub mileage: u64,
    pub list_price: u64,
}

impl AssetType {
    pub fn new(
        maintainers: Vec<Party>,
        identifier: impl Into<String>,
        make: impl Into<String>,
        mileage: u64,
        list_price: u64,
    ) -> Self {
        Self {
            linear_id: LinearId::new(),
            maintainers,
            identifier: identifier.into(),
            make: make.into(),
            mileage,
            list_price,
        }
    }

    pub fn participants(&self) -> Vec<AbstractParty> {
        self.maintainers.iter().map(AbstractParty::from).collect()
    }
}

/// A seller's standing offer to sell one unique token to one buyer.
///
/// The proposal points at the exact asset state it offers; if the asset
/// moves, the pointer goes stale and the proposal can no longer be
/// accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesProposal {
    pub linear_id: LinearId,
    /// The unique token state being offered.
    pub asset: StateRef,
    /// Linear id of that unique token, for lookups.
    pub asset_id: LinearId,
    pub seller: AbstractParty,
    pub buyer: AbstractParty,
    pub price: IssuedAmount,
    pub expiration: DateTime<Utc>,
}

impl SalesProposal {
    pub fn participants(&self) -> Vec<AbstractParty> {
        vec![self.seller, self.buyer]
    }

    /// The earliest instant the seller may cancel unilaterally.
    pub fn cancellable_from(&self) -> DateTime<Utc> {
        self.expiration + grace()
    }

    /// Accepts must be notarised strictly before this instant.
    pub fn acceptable_until(&self) -> DateTime<Utc> {
        self.expiration - grace()
    }

    /// At expiry the seller's node cancels the proposal on its own.
    pub fn next_scheduled_activity(&self, this: &StateRef) -> ScheduledActivity {
        ScheduledActivity {
            reference: *this,
            at: self.cancellable_from(),
            actor: self.seller.owning_key,
            activity: ActivityKind::ExpireProposal {
                linear_id: self.linear_id,
            },
        }
    }
}

fn grace() -> chrono::Duration {
    chrono::Duration::from_std(EXPIRATION_GRACE).unwrap_or(chrono::Duration::seconds(1))
}

/// The attestation service's view of a subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiligenceStatus {
    /// Linked to something that should block a sale (a lien, a theft report).
    Linked,
    Clear,
}

impl fmt::Display for DiligenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiligenceStatus::Linked => f.write_str("linked"),
            DiligenceStatus::Clear => f.write_str("clear"),
        }
    }
}

/// A request, agreed by its participants, that `oracle` certify the status
/// of `token_id` at some later point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDiligence {
    pub linear_id: LinearId,
    pub token_id: LinearId,
    pub oracle: Party,
    pub participants: Vec<AbstractParty>,
}

impl DueDiligence {
    pub fn new(token_id: LinearId, oracle: Party, participants: Vec<AbstractParty>) -> Self {
        Self {
            linear_id: LinearId::new(),
            token_id,
            oracle,
            participants,
        }
    }
}
