//! # Attestation
//!
//! A trusted party vouches for an external fact inside a transaction
//! without seeing the rest of it. The requester reveals only the
//! `Certify` commands naming the attester plus the time window; the
//! attester proves from the Merkle structure that nothing else needing its
//! key was left out, and signs the transaction id.
//!
//! ```text
//! facts.rs   — Subject → status table (absent means clear)
//! service.rs — Certification checks and the two responders
//! request.rs — Requester side: status queries and signature requests
//! ```

pub mod facts;
pub mod request;
pub mod service;

pub use facts::FactStore;
pub use request::{attestation_view, query_fact, request_attestation, submit_view};
pub use service::{install, AttestationService, CERTIFY_PROTOCOL, QUERY_PROTOCOL};
