// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Accord Contracts & Workflows
//!
//! The application on top of the protocol: the rules every transaction
//! must satisfy, and the workflows that build those transactions.
//!
//! - **Token** — issue, move and redeem fungible amounts and unique tokens.
//! - **Asset Type** — evolvable descriptions that unique tokens point at.
//! - **Sales Proposal** — a seller's time-limited offer to one buyer.
//! - **Due Diligence** — an oracle's certified status of a token, obtained
//!   over a partial view of the sale.
//!
//! ## Design Principles
//!
//! 1. Every command is claimed by exactly one contract; unknown directives
//!    are rejected rather than ignored.
//! 2. Amounts are summed with `checked_add`. Money never wraps.
//! 3. A signer's own review decides what it signs. Workflows never rely on
//!    the counterparty having checked for them.

pub mod asset_type;
pub mod due_diligence;
pub mod registry;
pub mod sales_proposal;
pub mod token;
pub mod workflows;

use std::sync::Arc;

use accord_protocol::transaction::ContractVerifier;

pub use registry::{Contract, ContractRegistry};
pub use workflows::{install, AppServices};

/// The verifier every node of this application runs.
pub fn verifier() -> Arc<dyn ContractVerifier> {
    Arc::new(ContractRegistry::standard())
}
