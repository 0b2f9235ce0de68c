//! # Cryptographic Primitives for Accord
//!
//! Everything a participant needs to prove who signed what:
//!
//! - **Ed25519** for signatures over transaction ids.
//! - **BLAKE3** for content hashes, component leaves and Merkle roots.
//!
//! Nothing here is clever. These are thin, typed wrappers around audited
//! crates so that the rest of the protocol never handles raw byte arrays
//! where a `PublicKey` or a `SecureHash` is meant.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, blake3_hash_multi, domain_separated_hash, merkle_root, SecureHash};
pub use keys::{DigitalSignature, KeyError, KeyPair, PublicKey};
pub use signatures::{SignatureError, TransactionSignature};
