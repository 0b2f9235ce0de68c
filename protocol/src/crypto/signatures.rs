//! # Transaction Signatures
//!
//! A [`TransactionSignature`] is a signature over a transaction id together
//! with the key that produced it. Signature sets on a transaction are keyed
//! by that key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hash::SecureHash;
use super::keys::{DigitalSignature, KeyPair, PublicKey};

/// Errors during signature checks.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature by {key} over {tx_id} does not verify")]
    VerificationFailed { key: String, tx_id: String },

    /// Some required signers have not signed yet.
    #[error("transaction {tx_id} is missing signatures from: {missing}")]
    MissingSignatures { tx_id: String, missing: String },
}

/// A signature over a transaction id, tagged with the signing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub by: PublicKey,
    pub signature: DigitalSignature,
}

impl TransactionSignature {
    /// Sign `tx_id` with `keypair`.
    pub fn sign(keypair: &KeyPair, tx_id: &SecureHash) -> Self {
        Self {
            by: keypair.public_key(),
            signature: keypair.sign(tx_id.as_bytes()),
        }
    }

    pub fn is_valid_for(&self, tx_id: &SecureHash) -> bool {
        self.by.verify(tx_id.as_bytes(), &self.signature)
    }

    pub fn verify(&self, tx_id: &SecureHash) -> Result<(), SignatureError> {
        if self.is_valid_for(tx_id) {
            Ok(())
        } else {
            Err(SignatureError::VerificationFailed {
                key: self.by.short(),
                tx_id: tx_id.short(),
            })
        }
    }
}
