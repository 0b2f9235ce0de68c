//! # Transaction Module
//!
//! How a proposal becomes something parties can sign.
//!
//! ```text
//! types.rs        — Directives (commands) and validity windows
//! wire.rs         — WireTransaction and its Merkle-rooted id
//! filtered.rs     — Selectively disclosed views and their checks
//! signed.rs       — WireTransaction plus an append-only signature set
//! ledger_tx.rs    — Resolved form handed to contract verification
//! verification.rs — The ContractVerifier seam and its error type
//! builder.rs      — Fluent TransactionBuilder
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Build** with [`TransactionBuilder`]: inputs, reference inputs,
//!    outputs, commands, time window.
//! 2. **Verify** locally through a [`ContractVerifier`]. Nothing has been
//!    signed or sent yet.
//! 3. **Sign** the frozen [`WireTransaction`] id; the result is a
//!    [`SignedTransaction`] that can only gain signatures from here on.
//! 4. **Collect**, **notarise** and **distribute**: see `flows`.

pub mod builder;
pub mod filtered;
pub mod ledger_tx;
pub mod signed;
pub mod types;
pub mod verification;
pub mod wire;

pub use builder::TransactionBuilder;
pub use filtered::{FilteredElement, FilteredTransaction, FilteredTransactionError};
pub use ledger_tx::{LedgerTransaction, StateLoader};
pub use signed::SignedTransaction;
pub use types::{
    AssetTypeCommand, Command, CommandData, DiligenceCommand, ProposalCommand, TimeWindow,
    TokenAction,
};
pub use verification::{require_that, ContractVerifier, VerificationError};
pub use wire::{Component, ComponentGroup, WireTransaction};
