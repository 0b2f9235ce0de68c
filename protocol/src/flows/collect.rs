//! # Signature Collection
//!
//! The proposer holds a transaction signed with its own keys and needs
//! signatures from the hosts of every other required key. One session per
//! host, each driven through its own small state machine:
//!
//! ```text
//!   Init ──send Role(Signer)──▶ RoleSent ──send Proposal──▶ AwaitingReview
//!                                                              │
//!                                 Signatures, all valid,  ◀────┤
//!                                 all from expected keys       │
//!                                        │                     │
//!                                        ▼                     ▼
//!                                     Signed               Rejected
//! ```
//!
//! Sessions run concurrently. The proposer returns only when every
//! session has reached `Signed`; a single `Rejected` fails the whole run.

use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::error::FlowError;
use super::identity_sync::{our_keys_in, sync_keys};
use super::resolve::dependencies_of;
use crate::crypto::{PublicKey, TransactionSignature};
use crate::identity::Party;
use crate::network::{Node, Session, TransactionRole, WireMessage};
use crate::transaction::SignedTransaction;

/// A session plus the role it has been told, if any.
#[derive(Debug)]
pub struct CounterpartySession {
    session: Session,
    role: Option<TransactionRole>,
}

impl CounterpartySession {
    pub fn new(session: Session) -> Self {
        Self { session, role: None }
    }

    pub fn counterparty(&self) -> &Party {
        self.session.counterparty()
    }

    pub fn role(&self) -> Option<TransactionRole> {
        self.role
    }

    /// Send the role once. A session keeps the first role it was given.
    pub async fn send_role(&mut self, role: TransactionRole) -> Result<(), FlowError> {
        match self.role {
            Some(sent) if sent == role => Ok(()),
            Some(sent) => Err(FlowError::ValidationFailure(format!(
                "session with {} already has role {}",
                self.counterparty(),
                sent
            ))),
            None => {
                self.session.send(WireMessage::Role(role)).await?;
                self.role = Some(role);
                Ok(())
            }
        }
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}

/// Where one counterparty session stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectState {
    Init,
    RoleSent,
    AwaitingReview,
    Signed,
    Rejected,
}

/// Drives one counterparty through the collection state machine.
struct Collector<'a> {
    node: &'a Node,
    stx: &'a SignedTransaction,
    dependencies: &'a [SignedTransaction],
    expected: BTreeSet<PublicKey>,
    state: CollectState,
}

impl Collector<'_> {
    fn advance(&mut self, next: CollectState, counterparty: &Party) {
        debug!(
            tx_id = %self.stx.id().short(),
            counterparty = %counterparty,
            from = ?self.state,
            to = ?next,
            "collection state"
        );
        self.state = next;
    }

    async fn run(mut self, cp: &mut CounterpartySession) -> Result<Vec<TransactionSignature>, FlowError> {
        let counterparty = cp.counterparty().clone();
        let result = self.drive(cp, &counterparty).await;
        if result.is_err() {
            self.advance(CollectState::Rejected, &counterparty);
        }
        result
    }

    async fn drive(
        &mut self,
        cp: &mut CounterpartySession,
        counterparty: &Party,
    ) -> Result<Vec<TransactionSignature>, FlowError> {
        loop {
            match self.state {
                CollectState::Init => {
                    cp.send_role(TransactionRole::Signer).await?;
                    self.advance(CollectState::RoleSent, counterparty);
                }
                CollectState::RoleSent => {
                    let session = cp.session_mut();
                    session
                        .send(WireMessage::Proposal {
                            transaction: self.stx.clone(),
                            dependencies: self.dependencies.to_vec(),
                        })
                        .await?;
                    sync_keys(self.node, session, our_keys_in(self.node, self.stx.tx())).await?;
                    self.advance(CollectState::AwaitingReview, counterparty);
                }
                CollectState::AwaitingReview => {
                    let sigs = match cp.session_mut().receive().await? {
                        WireMessage::Signatures(sigs) => sigs,
                        other => return Err(FlowError::unexpected("Signatures", &other)),
                    };
                    self.check_returned(&sigs, counterparty)?;
                    self.advance(CollectState::Signed, counterparty);
                    info!(
                        tx_id = %self.stx.id().short(),
                        counterparty = %counterparty,
                        signatures = sigs.len(),
                        "signatures received"
                    );
                    return Ok(sigs);
                }
                CollectState::Signed | CollectState::Rejected => {
                    return Err(FlowError::ValidationFailure(format!(
                        "collection with {} already finished",
                        counterparty
                    )));
                }
            }
        }
    }

    /// Every expected key must have signed, validly, and nothing else.
    fn check_returned(&self, sigs: &[TransactionSignature], counterparty: &Party) -> Result<(), FlowError> {
        let id = self.stx.id();
        for sig in sigs {
            if !self.expected.contains(&sig.by) {
                return Err(FlowError::ValidationFailure(format!(
                    "{} returned a signature by unexpected key {}",
                    counterparty,
                    sig.by.short()
                )));
            }
            sig.verify(&id)?;
        }
        let signed: BTreeSet<PublicKey> = sigs.iter().map(|s| s.by).collect();
        if let Some(missing) = self.expected.difference(&signed).next() {
            return Err(FlowError::ValidationFailure(format!(
                "{} did not sign with {}",
                counterparty,
                missing.short()
            )));
        }
        Ok(())
    }
}

/// Collect every outstanding signature except the notary's.
///
/// `sessions` must contain exactly one session per host of a missing key;
/// extra sessions are left untouched.
pub async fn collect_signatures(
    node: &Node,
    stx: SignedTransaction,
    sessions: &mut [CounterpartySession],
) -> Result<SignedTransaction, FlowError> {
    stx.check_signatures_are_valid()?;
    let notary_key = node.notary_party().owning_key;
    let tx_id = stx.id();

    let mut by_host: BTreeMap<Party, BTreeSet<PublicKey>> = BTreeMap::new();
    for key in stx.missing_signers() {
        if key == notary_key {
            continue;
        }
        if node.keys().is_mine(&key) {
            return Err(FlowError::ValidationFailure(format!(
                "own key {} has not signed",
                key.short()
            )));
        }
        let host = node.identity().require_host(&key)?;
        by_host.entry(host).or_default().insert(key);
    }

    if let Some(host) = by_host.keys().find(|h| !sessions.iter().any(|s| s.counterparty() == *h)) {
        return Err(FlowError::UnknownParty(format!("no session open with signer {}", host)));
    }

    let dependencies = dependencies_of(node.vault(), stx.tx())?;
    info!(
        tx_id = %tx_id.short(),
        party = %node.party(),
        hosts = by_host.len(),
        "collecting signatures"
    );

    let runs = sessions
        .iter_mut()
        .filter_map(|cp| {
            let expected = by_host.get(cp.counterparty())?.clone();
            let collector = Collector {
                node,
                stx: &stx,
                dependencies: &dependencies,
                expected,
                state: CollectState::Init,
            };
            Some(collector.run(cp))
        })
        .collect::<Vec<_>>();
    let collected = match try_join_all(runs).await {
        Ok(collected) => collected,
        Err(e) => {
            warn!(tx_id = %tx_id.short(), error = %e, "signature collection failed");
            return Err(e);
        }
    };

    let signed = stx.with_additional_signatures(collected.into_iter().flatten());
    let allowed: BTreeSet<PublicKey> = [notary_key].into_iter().collect();
    signed.verify_signatures_except(&allowed)?;
    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SecureHash};
    use crate::ledger::{FungibleToken, IssuedTokenType, TokenType};
    use crate::network::MockNetwork;
    use crate::transaction::{
        CommandData, ContractVerifier, LedgerTransaction, TokenAction, TransactionBuilder, VerificationError,
    };
    use std::sync::Arc;

    struct AcceptAll;

    impl ContractVerifier for AcceptAll {
        fn verify(&self, _tx: &LedgerTransaction) -> Result<(), VerificationError> {
            Ok(())
        }
    }

    struct Fixture {
        _net: MockNetwork,
        alice: Arc<Node>,
        bob: Arc<Node>,
        stx: SignedTransaction,
    }

    /// A transaction Alice has signed that still needs Bob's key.
    fn fixture() -> Fixture {
        let net = MockNetwork::new(Arc::new(AcceptAll));
        let alice = net.create_node("Alice").unwrap();
        let bob = net.create_node("Bob").unwrap();
        let issued = IssuedTokenType::new(alice.party().clone(), TokenType::usd());
        let keys = [alice.party().owning_key, bob.party().owning_key];
        let stx = TransactionBuilder::new(net.notary_party().clone())
            .add_output_state(FungibleToken::new(issued.clone(), bob.party().anonymise(), 10))
            .add_command(CommandData::token(TokenAction::Issue, issued), keys)
            .sign_initial(alice.keys(), &keys[..1])
            .unwrap();
        Fixture {
            _net: net,
            alice,
            bob,
            stx,
        }
    }

    fn collector<'a>(f: &'a Fixture) -> Collector<'a> {
        Collector {
            node: &f.alice,
            stx: &f.stx,
            dependencies: &[],
            expected: [f.bob.party().owning_key].into_iter().collect(),
            state: CollectState::AwaitingReview,
        }
    }

    #[tokio::test]
    async fn expected_signature_is_accepted() {
        let f = fixture();
        let sig = f.bob.keys().sign(&f.bob.party().owning_key, &f.stx.id()).unwrap();
        assert!(collector(&f).check_returned(&[sig], f.bob.party()).is_ok());
    }

    #[tokio::test]
    async fn signature_by_an_unexpected_key_is_rejected() {
        let f = fixture();
        let bob_sig = f.bob.keys().sign(&f.bob.party().owning_key, &f.stx.id()).unwrap();
        let stranger = TransactionSignature::sign(&KeyPair::generate(), &f.stx.id());

        let err = collector(&f)
            .check_returned(&[bob_sig, stranger], f.bob.party())
            .unwrap_err();
        assert!(matches!(&err, FlowError::ValidationFailure(m) if m.contains("unexpected key")), "{err}");
    }

    #[tokio::test]
    async fn signature_over_other_bytes_is_rejected() {
        let f = fixture();
        let elsewhere = SecureHash::of(b"some other transaction");
        let sig = f.bob.keys().sign(&f.bob.party().owning_key, &elsewhere).unwrap();

        let err = collector(&f).check_returned(&[sig], f.bob.party()).unwrap_err();
        assert!(matches!(&err, FlowError::ValidationFailure(m) if m.contains("does not verify")), "{err}");
    }

    #[tokio::test]
    async fn relabelled_signature_is_rejected() {
        let f = fixture();
        let mut sig = TransactionSignature::sign(&KeyPair::generate(), &f.stx.id());
        sig.by = f.bob.party().owning_key;

        let err = collector(&f).check_returned(&[sig], f.bob.party()).unwrap_err();
        assert!(matches!(err, FlowError::ValidationFailure(_)), "{err}");
    }

    #[tokio::test]
    async fn reply_without_the_required_key_is_rejected() {
        let f = fixture();
        let err = collector(&f).check_returned(&[], f.bob.party()).unwrap_err();
        assert!(matches!(&err, FlowError::ValidationFailure(m) if m.contains("did not sign")), "{err}");
    }

    #[tokio::test]
    async fn collection_fails_without_a_session_for_a_signer() {
        let f = fixture();
        let err = collect_signatures(&f.alice, f.stx.clone(), &mut []).await.unwrap_err();
        assert!(matches!(err, FlowError::UnknownParty(_)), "{err}");
    }
}
