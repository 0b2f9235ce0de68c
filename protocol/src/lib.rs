// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Accord Protocol — Core Library
//!
//! Multi-party transaction coordination over a shared ledger of immutable
//! records. There is no global chain: each participant keeps its own
//! store of the transactions it took part in, and a notary is the only
//! party that sees every input.
//!
//! ## Architecture
//!
//! ```text
//!   vault::TokenSelection ─▶ transaction::TransactionBuilder
//!                                   │
//!                                   ▼
//!                       flows::collect_signatures ◀──▶ flows::sign_transaction
//!                                   │       └─▶ attestation::request_attestation
//!                                   ▼
//!                          flows::finalize ─▶ notary ─▶ every vault
//!
//!   scheduler::ExpirationScheduler ── watches vaults, runs expiries
//! ```
//!
//! - **crypto** — BLAKE3 hashes, Ed25519 keys, transaction signatures.
//! - **identity** — Parties, pseudonymous keys, key-ownership proofs.
//! - **ledger** — Records: tokens, asset descriptions, proposals, diligence.
//! - **transaction** — Wire, filtered, signed and resolved transactions.
//! - **vault** — The sled-backed local ledger store and coin selection.
//! - **network** — Sessions, nodes and the in-process mock network.
//! - **notary** — Uniqueness and time-window service.
//! - **flows** — Signature collection, finality and their coordinator.
//! - **attestation** — Certifying off-ledger facts over partial views.
//! - **scheduler** — Self-triggering activities such as proposal expiry.
//! - **clock**, **config** — Time source, constants and node tunables.
//!
//! ## Design Philosophy
//!
//! 1. Nothing is written before it is final. Reviewers record only the
//!    notarised transaction; proposers record only after the notary signs.
//! 2. Nobody signs on someone else's word. Every signer re-derives what
//!    it is signing from the transaction itself.
//! 3. Failures travel. An error raised by a counterparty reaches the
//!    initiator as the same variant.

pub mod attestation;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod flows;
pub mod identity;
pub mod ledger;
pub mod network;
pub mod notary;
pub mod scheduler;
pub mod transaction;
pub mod vault;
