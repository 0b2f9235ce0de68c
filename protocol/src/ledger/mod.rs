//! # Ledger Records
//!
//! Immutable, versioned records. A record is born as an output of a
//! transaction, lives while unconsumed, and dies when a later transaction
//! consumes it as an input. Nothing mutates a record in place; "changing"
//! one means consuming it and producing a successor, which for linear
//! records carries the same [`LinearId`].

pub mod proposal;
pub mod state;
pub mod token;

pub use proposal::{AssetType, DiligenceStatus, DueDiligence, SalesProposal};
pub use state::{
    ActivityKind, ContractState, LinearId, ScheduledActivity, StateAndRef, StateKind, StateRef,
    StateType, TransactionState,
};
pub use token::{FungibleToken, IssuedAmount, IssuedTokenType, TokenType, UniqueToken};
