//! A transaction plus the signatures collected over its id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::wire::WireTransaction;
use crate::crypto::{PublicKey, SecureHash, SignatureError, TransactionSignature};

/// A [`WireTransaction`] with an append-only signature set.
///
/// The transaction itself is frozen from the moment the first signature
/// exists; the only way to change a `SignedTransaction` is to add
/// signatures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SignedTransactionParts")]
pub struct SignedTransaction {
    tx: WireTransaction,
    sigs: Vec<TransactionSignature>,
}

/// Decoded form, rebuilt through [`SignedTransaction::new`] so a received
/// signature set is deduplicated like a locally built one.
#[derive(Deserialize)]
struct SignedTransactionParts {
    tx: WireTransaction,
    sigs: Vec<TransactionSignature>,
}

impl From<SignedTransactionParts> for SignedTransaction {
    fn from(parts: SignedTransactionParts) -> Self {
        Self::new(parts.tx, parts.sigs)
    }
}

impl SignedTransaction {
    pub fn new(tx: WireTransaction, sigs: Vec<TransactionSignature>) -> Self {
        let mut stx = Self { tx, sigs: Vec::new() };
        stx.extend(sigs);
        stx
    }

    pub fn tx(&self) -> &WireTransaction {
        &self.tx
    }

    pub fn sigs(&self) -> &[TransactionSignature] {
        &self.sigs
    }

    pub fn id(&self) -> SecureHash {
        self.tx.id()
    }

    fn extend(&mut self, sigs: impl IntoIterator<Item = TransactionSignature>) {
        for sig in sigs {
            if !self.sigs.iter().any(|s| s.by == sig.by) {
                self.sigs.push(sig);
            }
        }
    }

    /// A copy with `sig` added. A second signature by the same key is
    /// ignored.
    pub fn with_additional_signature(&self, sig: TransactionSignature) -> Self {
        self.with_additional_signatures([sig])
    }

    pub fn with_additional_signatures(&self, sigs: impl IntoIterator<Item = TransactionSignature>) -> Self {
        let mut next = self.clone();
        next.extend(sigs);
        next
    }

    pub fn signing_keys(&self) -> BTreeSet<PublicKey> {
        self.sigs.iter().map(|s| s.by).collect()
    }

    pub fn required_signing_keys(&self) -> BTreeSet<PublicKey> {
        self.tx.required_signing_keys()
    }

    /// Required keys that have not signed yet.
    pub fn missing_signers(&self) -> BTreeSet<PublicKey> {
        let present = self.signing_keys();
        self.required_signing_keys()
            .into_iter()
            .filter(|k| !present.contains(k))
            .collect()
    }

    /// Every attached signature is valid over the id. Says nothing about
    /// whether the set is complete.
    pub fn check_signatures_are_valid(&self) -> Result<(), SignatureError> {
        let id = self.id();
        self.sigs.iter().try_for_each(|s| s.verify(&id))
    }

    /// All signatures valid and every required key signed, except those in
    /// `allowed_missing`.
    pub fn verify_signatures_except(&self, allowed_missing: &BTreeSet<PublicKey>) -> Result<(), SignatureError> {
        self.check_signatures_are_valid()?;
        let missing: Vec<String> = self
            .missing_signers()
            .iter()
            .filter(|k| !allowed_missing.contains(k))
            .map(PublicKey::short)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SignatureError::MissingSignatures {
                tx_id: self.id().short(),
                missing: missing.join(", "),
            })
        }
    }

    pub fn verify_required_signatures(&self) -> Result<(), SignatureError> {
        self.verify_signatures_except(&BTreeSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::identity::Party;
    use crate::transaction::types::{Command, CommandData, ProposalCommand};

    fn tx_for(signers: &[&KeyPair], notary: &KeyPair) -> WireTransaction {
        WireTransaction {
            inputs: vec![],
            references: vec![],
            outputs: vec![],
            commands: vec![Command::new(
                CommandData::Proposal(ProposalCommand::Reject),
                signers.iter().map(|k| k.public_key()),
            )],
            notary: Some(Party::new("Notary", notary.public_key())),
            time_window: None,
            privacy_salt: [1u8; 32],
        }
    }

    #[test]
    fn missing_signers_shrink_as_signatures_arrive() {
        let (a, b, n) = (KeyPair::generate(), KeyPair::generate(), KeyPair::generate());
        let wtx = tx_for(&[&a, &b], &n);
        let id = wtx.id();
        let stx = SignedTransaction::new(wtx, vec![TransactionSignature::sign(&a, &id)]);
        assert_eq!(stx.missing_signers().len(), 2);

        let stx = stx.with_additional_signature(TransactionSignature::sign(&b, &id));
        let notary_only: BTreeSet<_> = [n.public_key()].into_iter().collect();
        stx.verify_signatures_except(&notary_only).unwrap();
        assert!(stx.verify_required_signatures().is_err());

        let done = stx.with_additional_signature(TransactionSignature::sign(&n, &id));
        done.verify_required_signatures().unwrap();
    }

    #[test]
    fn duplicate_signatures_are_ignored() {
        let (a, n) = (KeyPair::generate(), KeyPair::generate());
        let wtx = tx_for(&[&a], &n);
        let id = wtx.id();
        let sig = TransactionSignature::sign(&a, &id);
        let stx = SignedTransaction::new(wtx, vec![sig.clone(), sig]);
        assert_eq!(stx.sigs().len(), 1);
    }

    #[test]
    fn decoding_drops_repeated_signers() {
        #[derive(Serialize)]
        struct Encoded<'a> {
            tx: &'a WireTransaction,
            sigs: Vec<TransactionSignature>,
        }

        let (a, n) = (KeyPair::generate(), KeyPair::generate());
        let wtx = tx_for(&[&a], &n);
        let id = wtx.id();
        let first = TransactionSignature::sign(&a, &id);
        let again = TransactionSignature::sign(&a, &id);
        let bytes = bincode::serialize(&Encoded {
            tx: &wtx,
            sigs: vec![first.clone(), again, TransactionSignature::sign(&n, &id)],
        })
        .unwrap();

        let stx: SignedTransaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(stx.sigs().len(), 2);
        assert_eq!(stx.sigs()[0], first);
        stx.verify_required_signatures().unwrap();
        assert_eq!(bincode::deserialize::<SignedTransaction>(&bincode::serialize(&stx).unwrap()).unwrap(), stx);
    }

    #[test]
    fn signature_over_another_id_is_invalid() {
        let (a, n) = (KeyPair::generate(), KeyPair::generate());
        let wtx = tx_for(&[&a], &n);
        let bogus = TransactionSignature::sign(&a, &SecureHash::of(b"elsewhere"));
        let stx = SignedTransaction::new(wtx, vec![bogus]);
        assert!(stx.check_signatures_are_valid().is_err());
    }
}
