//! # Identity Module
//!
//! Parties, keys, and the mapping between them.
//!
//! Records never name hosts directly; they name keys. Before a node can
//! open a session with "whoever holds this key" it must resolve the key to
//! a well-known [`Party`]. Legal identity keys resolve through the shared
//! network map. Fresh pseudonymous keys resolve only after their owner has
//! shared a signed [`KeyOwnershipProof`].

pub mod party;
pub mod service;

pub use party::{AbstractParty, Party};
pub use service::{IdentityError, IdentityService, KeyManager, KeyOwnershipProof, NetworkMap};
