//! The seam between the protocol and business rules.
//!
//! The protocol never decides whether a transaction is *legal*; it resolves
//! it into a [`LedgerTransaction`], checks a few structural rules that hold
//! for every transaction, and hands it to a [`ContractVerifier`].
//! Verification fails closed: any error aborts the whole attempt.

use thiserror::Error;

use super::ledger_tx::LedgerTransaction;
use crate::ledger::StateRef;
use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum VerificationError {
    /// An input or reference could not be resolved to its creating
    /// transaction.
    #[error("missing dependency for state {0}")]
    MissingDependency(StateRef),

    #[error("transaction has no commands")]
    NoCommands,

    #[error("transaction has no notary")]
    MissingNotary,

    #[error("state {0} is consumed more than once")]
    DuplicateInput(StateRef),

    #[error("state {0} is both an input and a reference")]
    InputAlsoReference(StateRef),

    /// Every input, reference and output must share the transaction's
    /// notary.
    #[error("state {0} is governed by a different notary")]
    NotaryMismatch(String),

    /// A business rule rejected the transaction.
    #[error("contract {contract} rejected the transaction: {reason}")]
    Contract { contract: String, reason: String },

    #[error("failed to load states: {0}")]
    Storage(#[from] VaultError),
}

/// Business-level validation, supplied by the application.
pub trait ContractVerifier: Send + Sync {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError>;
}

/// Fail with a [`VerificationError::Contract`] unless `condition` holds.
pub fn require_that(condition: bool, contract: &str, reason: &str) -> Result<(), VerificationError> {
    if condition {
        Ok(())
    } else {
        Err(VerificationError::Contract {
            contract: contract.to_string(),
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_that_names_the_contract() {
        assert!(require_that(true, "token", "fine").is_ok());
        let err = require_that(false, "token", "amounts must balance").unwrap_err();
        assert_eq!(
            err.to_string(),
            "contract token rejected the transaction: amounts must balance"
        );
    }
}
