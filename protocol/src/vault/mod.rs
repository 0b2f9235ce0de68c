//! # Vault Module
//!
//! A participant's private view of the ledger.
//!
//! ```text
//! store.rs     — sled-backed transaction and state store, queries, updates
//! selection.rs — Paged coin selection over fungible holdings
//! ```
//!
//! Nothing in a vault is shared. Two vaults agree only because they
//! recorded the same notarised transactions.

pub mod selection;
pub mod store;

pub use selection::{GeneratedMove, SelectionAccumulator, SelectionCriteria, SelectionError, TokenSelection};
pub use store::{
    Page, PageSpecification, QueryCriteria, StateStatus, StatesToRecord, Vault, VaultError, VaultUpdate,
};
