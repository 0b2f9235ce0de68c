//! Session payloads and the frames that carry them.
//!
//! Every message exchanged between two participants during a protocol
//! run is a [`WireMessage`]. On the wire it travels inside a [`Frame`],
//! bincode-encoded, so a responder can answer any message with an error
//! frame instead.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::WIRE_PROTOCOL_VERSION;
use crate::crypto::{PublicKey, TransactionSignature};
use crate::identity::KeyOwnershipProof;
use crate::ledger::{DiligenceStatus, LinearId};
use crate::transaction::{FilteredTransaction, SignedTransaction};

/// Why a counterparty is being contacted about a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionRole {
    /// Must review and co-sign.
    Signer,
    /// Receives the notarised result only.
    Participant,
}

impl fmt::Display for TransactionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRole::Signer => f.write_str("signer"),
            TransactionRole::Participant => f.write_str("participant"),
        }
    }
}

/// Payloads, roughly in the order a signing session uses them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireMessage {
    Role(TransactionRole),
    /// A transaction to review, with the transactions that created its
    /// inputs and references.
    Proposal {
        transaction: SignedTransaction,
        dependencies: Vec<SignedTransaction>,
    },
    /// Keys the sender uses in the transaction.
    IdentityQuery(Vec<PublicKey>),
    /// Keys from the query the receiver could not resolve.
    MissingKeys(Vec<PublicKey>),
    ResolvedKeys(Vec<KeyOwnershipProof>),
    Signatures(Vec<TransactionSignature>),
    FilteredTransaction(FilteredTransaction),
    AttestationSignature(TransactionSignature),
    Notarized {
        transaction: SignedTransaction,
        dependencies: Vec<SignedTransaction>,
    },
    Ack,
    FactQuery(LinearId),
    FactStatus(DiligenceStatus),
    /// An already notarised transaction pushed to a party that tracks it.
    Inform {
        transaction: SignedTransaction,
        dependencies: Vec<SignedTransaction>,
    },
}

impl WireMessage {
    pub fn name(&self) -> &'static str {
        match self {
            WireMessage::Role(_) => "Role",
            WireMessage::Proposal { .. } => "Proposal",
            WireMessage::IdentityQuery(_) => "IdentityQuery",
            WireMessage::MissingKeys(_) => "MissingKeys",
            WireMessage::ResolvedKeys(_) => "ResolvedKeys",
            WireMessage::Signatures(_) => "Signatures",
            WireMessage::FilteredTransaction(_) => "FilteredTransaction",
            WireMessage::AttestationSignature(_) => "AttestationSignature",
            WireMessage::Notarized { .. } => "Notarized",
            WireMessage::Ack => "Ack",
            WireMessage::FactQuery(_) => "FactQuery",
            WireMessage::FactStatus(_) => "FactStatus",
            WireMessage::Inform { .. } => "Inform",
        }
    }
}

/// Category of a failure reported by the far side of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationFailure,
    RejectedTransaction,
    InsufficientFunds { requested: u64, available: u64 },
    DoubleSpendOrConflict,
    DisclosureViolation,
    UnknownParty,
    UnexpectedMessage,
    NotFound,
    /// No responder is registered for the requested protocol.
    UnknownProtocol,
    Internal,
}

/// What actually travels through a session channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Frame {
    Payload { version: u16, message: WireMessage },
    Error { kind: ErrorKind, message: String },
}

impl Frame {
    pub fn payload(message: WireMessage) -> Self {
        Frame::Payload {
            version: WIRE_PROTOCOL_VERSION,
            message,
        }
    }
}
