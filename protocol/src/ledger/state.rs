//! Core ledger record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::proposal::{AssetType, DueDiligence, SalesProposal};
use super::token::{FungibleToken, UniqueToken};
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::{AbstractParty, Party};

/// Position of a record in the transaction that created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }

    /// 36-byte big-endian key, used by the store.
    pub fn to_key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(self.txhash.as_bytes());
        key[32..].copy_from_slice(&self.index.to_be_bytes());
        key
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash.short(), self.index)
    }
}

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateRef({})", self)
    }
}

/// Identity shared by every version of an evolving record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinearId(Uuid);

impl LinearId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LinearId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinearId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ContractState
// ---------------------------------------------------------------------------

/// Every kind of record the ledger knows about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractState {
    Fungible(FungibleToken),
    Unique(UniqueToken),
    AssetType(AssetType),
    Proposal(SalesProposal),
    Diligence(DueDiligence),
}

/// Discriminant of [`ContractState`], for queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    Fungible,
    Unique,
    AssetType,
    Proposal,
    Diligence,
}

impl ContractState {
    pub fn state_type(&self) -> StateType {
        match self {
            ContractState::Fungible(_) => StateType::Fungible,
            ContractState::Unique(_) => StateType::Unique,
            ContractState::AssetType(_) => StateType::AssetType,
            ContractState::Proposal(_) => StateType::Proposal,
            ContractState::Diligence(_) => StateType::Diligence,
        }
    }

    /// Parties whose nodes must learn about this record.
    pub fn participants(&self) -> Vec<AbstractParty> {
        match self {
            ContractState::Fungible(t) => vec![t.holder],
            ContractState::Unique(t) => vec![t.holder],
            ContractState::AssetType(a) => a.participants(),
            ContractState::Proposal(p) => p.participants(),
            ContractState::Diligence(d) => d.participants.clone(),
        }
    }

    pub fn participant_keys(&self) -> Vec<PublicKey> {
        self.participants().iter().map(|p| p.owning_key).collect()
    }

    pub fn linear_id(&self) -> Option<LinearId> {
        match self {
            ContractState::Fungible(_) => None,
            ContractState::Unique(t) => Some(t.linear_id),
            ContractState::AssetType(a) => Some(a.linear_id),
            ContractState::Proposal(p) => Some(p.linear_id),
            ContractState::Diligence(d) => Some(d.linear_id),
        }
    }

    /// Holder of a token record.
    pub fn holder(&self) -> Option<AbstractParty> {
        match self {
            ContractState::Fungible(t) => Some(t.holder),
            ContractState::Unique(t) => Some(t.holder),
            _ => None,
        }
    }

    /// An activity the record wants run on its own at some instant.
    pub fn next_scheduled_activity(&self, this: &StateRef) -> Option<ScheduledActivity> {
        match self {
            ContractState::Proposal(p) => Some(p.next_scheduled_activity(this)),
            _ => None,
        }
    }
}

/// Typed access into [`ContractState`].
pub trait StateKind: Sized {
    fn from_state(state: &ContractState) -> Option<&Self>;
}

macro_rules! impl_state_kind {
    ($ty:ty, $variant:ident) => {
        impl StateKind for $ty {
            fn from_state(state: &ContractState) -> Option<&Self> {
                match state {
                    ContractState::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for ContractState {
            fn from(inner: $ty) -> Self {
                ContractState::$variant(inner)
            }
        }
    };
}

impl_state_kind!(FungibleToken, Fungible);
impl_state_kind!(UniqueToken, Unique);
impl_state_kind!(AssetType, AssetType);
impl_state_kind!(SalesProposal, Proposal);
impl_state_kind!(DueDiligence, Diligence);

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

/// A record plus the notary that orders its consumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionState {
    pub data: ContractState,
    pub notary: Party,
}

impl TransactionState {
    pub fn new(data: impl Into<ContractState>, notary: Party) -> Self {
        Self {
            data: data.into(),
            notary,
        }
    }

    pub fn get<T: StateKind>(&self) -> Option<&T> {
        T::from_state(&self.data)
    }
}

/// A record and where it lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: TransactionState,
    pub reference: StateRef,
}

impl StateAndRef {
    pub fn new(state: TransactionState, reference: StateRef) -> Self {
        Self { state, reference }
    }

    pub fn get<T: StateKind>(&self) -> Option<&T> {
        self.state.get::<T>()
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Something a record asks its owner's node to do at `at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledActivity {
    /// The record that asked.
    pub reference: StateRef,
    pub at: DateTime<Utc>,
    /// Only the node holding this key runs the activity.
    pub actor: PublicKey,
    pub activity: ActivityKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    /// Cancel a sale proposal that nobody acted on.
    ExpireProposal { linear_id: LinearId },
}
