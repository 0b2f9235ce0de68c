//! # Flows
//!
//! The choreography that turns a locally built transaction into a
//! notarised fact every interested party has recorded.
//!
//! ```text
//! error.rs         — FlowError and the failure taxonomy
//! resolve.rs       — Dependency shipping and overlay resolution
//! identity_sync.rs — Missing-key / resolved-key exchange
//! collect.rs       — Proposer side of signature collection
//! sign.rs          — Reviewer side, with pluggable AdditionalCheck
//! finality.rs      — Notarise, record, distribute, acknowledge
//! coordinator.rs   — Generic initiator and responder built from the above
//! ```
//!
//! Each step either completes or leaves no trace: reviewers write nothing
//! until they receive the notarised transaction, and the proposer records
//! only after the notary has signed.

pub mod collect;
pub mod coordinator;
pub mod error;
pub mod finality;
pub mod identity_sync;
pub mod resolve;
pub mod sign;

pub use collect::{collect_signatures, CollectState, CounterpartySession};
pub use coordinator::{coordinate, coordinate_finalized, respond, respond_recording, signer_hosts, CoordinatedResponder};
pub use error::FlowError;
pub use finality::{finalize, receive_finality, receive_inform, record_checked, send_inform, Finalized};
pub use identity_sync::{our_keys_in, sync_keys, sync_keys_handler};
pub use resolve::{check_dependencies, dependencies_of, require_network_notary, DependencyOverlay};
pub use sign::{sign_transaction, AdditionalCheck, NoAdditionalChecks, SigningContext};
