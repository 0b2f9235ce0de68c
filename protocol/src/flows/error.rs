//! The error every protocol run ends with when it does not succeed.
//!
//! The first five variants are the protocol's failure taxonomy; they
//! survive a trip across a session, so an initiator sees exactly the
//! variant the counterparty raised. The rest are plumbing.

use thiserror::Error;

use crate::crypto::{KeyError, SignatureError};
use crate::identity::IdentityError;
use crate::network::{ErrorKind, SessionError};
use crate::notary::NotaryError;
use crate::transaction::{FilteredTransactionError, VerificationError};
use crate::vault::{SelectionError, VaultError};

#[derive(Debug, Error)]
pub enum FlowError {
    /// The verifier or a structural check rejected the transaction.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// A counterparty's safety check refused to sign.
    #[error("transaction rejected: {0}")]
    RejectedTransaction(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    /// The notary saw an input already spent, or a reference no longer
    /// current.
    #[error("double spend or conflict: {0}")]
    DoubleSpendOrConflict(String),

    /// An attestation request hid something the attester must see.
    #[error("disclosure violation: {0}")]
    DisclosureViolation(String),

    #[error("session error: {0}")]
    Session(SessionError),

    #[error("storage error: {0}")]
    Storage(#[from] VaultError),

    #[error("unknown party: {0}")]
    UnknownParty(String),

    #[error("expected {expected}, received {got}")]
    UnexpectedMessage { expected: &'static str, got: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

impl FlowError {
    /// How this error is reported over a session.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::ValidationFailure(_) => ErrorKind::ValidationFailure,
            FlowError::RejectedTransaction(_) => ErrorKind::RejectedTransaction,
            FlowError::InsufficientFunds { requested, available } => ErrorKind::InsufficientFunds {
                requested: *requested,
                available: *available,
            },
            FlowError::DoubleSpendOrConflict(_) => ErrorKind::DoubleSpendOrConflict,
            FlowError::DisclosureViolation(_) => ErrorKind::DisclosureViolation,
            FlowError::UnknownParty(_) => ErrorKind::UnknownParty,
            FlowError::UnexpectedMessage { .. } => ErrorKind::UnexpectedMessage,
            FlowError::NotFound(_) => ErrorKind::NotFound,
            FlowError::Session(SessionError::Remote { kind, .. }) => *kind,
            FlowError::Session(_) | FlowError::Storage(_) | FlowError::Key(_) => ErrorKind::Internal,
        }
    }

    /// Rebuild the error a counterparty reported.
    pub fn from_remote(counterparty: &str, kind: ErrorKind, message: String) -> Self {
        let message = format!("{}: {}", counterparty, message);
        match kind {
            ErrorKind::ValidationFailure => FlowError::ValidationFailure(message),
            ErrorKind::RejectedTransaction => FlowError::RejectedTransaction(message),
            ErrorKind::InsufficientFunds { requested, available } => {
                FlowError::InsufficientFunds { requested, available }
            }
            ErrorKind::DoubleSpendOrConflict => FlowError::DoubleSpendOrConflict(message),
            ErrorKind::DisclosureViolation => FlowError::DisclosureViolation(message),
            ErrorKind::UnknownParty => FlowError::UnknownParty(message),
            ErrorKind::NotFound => FlowError::NotFound(message),
            ErrorKind::UnexpectedMessage | ErrorKind::UnknownProtocol | ErrorKind::Internal => {
                FlowError::Session(SessionError::Remote {
                    counterparty: counterparty.to_string(),
                    kind,
                    message,
                })
            }
        }
    }

    pub fn unexpected(expected: &'static str, got: &crate::network::WireMessage) -> Self {
        FlowError::UnexpectedMessage {
            expected,
            got: got.name().to_string(),
        }
    }

    /// True for outcomes where a concurrent actor simply got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, FlowError::DoubleSpendOrConflict(_))
    }
}

impl From<SessionError> for FlowError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Remote {
                counterparty,
                kind,
                message,
            } => FlowError::from_remote(&counterparty, kind, message),
            other => FlowError::Session(other),
        }
    }
}

impl From<VerificationError> for FlowError {
    fn from(e: VerificationError) -> Self {
        FlowError::ValidationFailure(e.to_string())
    }
}

impl From<SignatureError> for FlowError {
    fn from(e: SignatureError) -> Self {
        FlowError::ValidationFailure(e.to_string())
    }
}

impl From<SelectionError> for FlowError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::InsufficientFunds { requested, available } => {
                FlowError::InsufficientFunds { requested, available }
            }
            SelectionError::Vault(inner) => FlowError::Storage(inner),
            other => FlowError::ValidationFailure(other.to_string()),
        }
    }
}

impl From<NotaryError> for FlowError {
    fn from(e: NotaryError) -> Self {
        match e {
            NotaryError::Conflict { .. } => FlowError::DoubleSpendOrConflict(e.to_string()),
            other => FlowError::ValidationFailure(other.to_string()),
        }
    }
}

impl From<FilteredTransactionError> for FlowError {
    fn from(e: FilteredTransactionError) -> Self {
        match e {
            FilteredTransactionError::HiddenCommand { .. } | FilteredTransactionError::SignersNotVisible => {
                FlowError::DisclosureViolation(e.to_string())
            }
            other => FlowError::ValidationFailure(other.to_string()),
        }
    }
}

impl From<IdentityError> for FlowError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidProof(_) => FlowError::ValidationFailure(e.to_string()),
            other => FlowError::UnknownParty(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecureHash;

    #[test]
    fn taxonomy_survives_the_wire() {
        let cases = [
            FlowError::ValidationFailure("x".into()),
            FlowError::RejectedTransaction("x".into()),
            FlowError::InsufficientFunds {
                requested: 9,
                available: 2,
            },
            FlowError::DoubleSpendOrConflict("x".into()),
            FlowError::DisclosureViolation("x".into()),
        ];
        for original in cases {
            let remote = SessionError::Remote {
                counterparty: "Bob".into(),
                kind: original.kind(),
                message: original.to_string(),
            };
            let rebuilt = FlowError::from(remote);
            assert_eq!(rebuilt.kind(), original.kind());
        }
    }

    #[test]
    fn notary_conflicts_become_double_spends() {
        let e = FlowError::from(NotaryError::Conflict {
            tx_id: SecureHash::of(b"tx"),
            conflicts: vec![],
        });
        assert!(e.is_conflict());
    }

    #[test]
    fn hidden_commands_are_disclosure_violations() {
        let e = FlowError::from(FilteredTransactionError::HiddenCommand {
            index: 1,
            key: "k".into(),
        });
        assert_eq!(e.kind(), ErrorKind::DisclosureViolation);
        let e = FlowError::from(FilteredTransactionError::RootMismatch("r".into()));
        assert_eq!(e.kind(), ErrorKind::ValidationFailure);
    }
}
