//! End-to-end tests for the Accord protocol.
//!
//! These run whole transactions across an in-process network: building,
//! collecting signatures, notarisation and distribution to every vault.
//! Contract rules are out of scope here, so every node verifies with a
//! verifier that accepts anything.
//!
//! Each test starts its own network with temporary vaults.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;

use accord_protocol::clock::Clock;
use accord_protocol::crypto::{KeyPair, TransactionSignature};
use accord_protocol::flows::{
    coordinate, coordinate_finalized, sync_keys_handler, CoordinatedResponder, FlowError, NoAdditionalChecks,
    SigningContext,
};
use accord_protocol::ledger::{FungibleToken, IssuedTokenType, StateAndRef, StateRef, StateType, TokenType};
use accord_protocol::network::{FlowResponder, MockNetwork, Node, Session, WireMessage};
use accord_protocol::transaction::{
    CommandData, ContractVerifier, LedgerTransaction, SignedTransaction, TimeWindow, TokenAction, TransactionBuilder,
    VerificationError,
};
use accord_protocol::vault::{QueryCriteria, SelectionCriteria, TokenSelection};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const TOKEN_PROTOCOL: &str = "test.token";
const STRICT_PROTOCOL: &str = "test.strict";
const FORGING_PROTOCOL: &str = "test.forging";
const DELIVERY_PROTOCOL: &str = "test.delivery";

struct AcceptAll;

impl ContractVerifier for AcceptAll {
    fn verify(&self, _tx: &LedgerTransaction) -> Result<(), VerificationError> {
        Ok(())
    }
}

fn refuse(ctx: &SigningContext<'_>) -> Result<(), FlowError> {
    Err(FlowError::RejectedTransaction(format!("{} is not trusted", ctx.counterparty)))
}

/// Plays a signer, but answers with its own key on a signature it did not
/// make.
struct ForgedSignature;

#[async_trait]
impl FlowResponder for ForgedSignature {
    async fn respond(&self, node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
        match session.receive().await? {
            WireMessage::Role(_) => {}
            other => return Err(FlowError::unexpected("Role", &other)),
        }
        let stx = match session.receive().await? {
            WireMessage::Proposal { transaction, .. } => transaction,
            other => return Err(FlowError::unexpected("Proposal", &other)),
        };
        sync_keys_handler(&node, session).await?;
        let mut forged = TransactionSignature::sign(&KeyPair::generate(), &stx.id());
        forged.by = node.party().owning_key;
        session.send(WireMessage::Signatures(vec![forged])).await?;
        Ok(())
    }
}

/// Takes its role, then turns the notarised result away.
struct RefuseDelivery;

#[async_trait]
impl FlowResponder for RefuseDelivery {
    async fn respond(&self, _node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
        session.receive().await?;
        match session.receive().await? {
            WireMessage::Notarized { .. } => Err(FlowError::RejectedTransaction("not accepting deliveries".into())),
            other => Err(FlowError::unexpected("Notarized", &other)),
        }
    }
}

/// A network of `names`, each answering [`TOKEN_PROTOCOL`] by signing
/// anything, [`STRICT_PROTOCOL`] by refusing and [`FORGING_PROTOCOL`] with
/// a forged signature.
fn network(names: &[&str]) -> (MockNetwork, Vec<Arc<Node>>) {
    let net = MockNetwork::new(Arc::new(AcceptAll));
    let nodes: Vec<_> = names.iter().map(|n| net.create_node(n).expect("node")).collect();
    for node in &nodes {
        node.register_responder(TOKEN_PROTOCOL, Arc::new(CoordinatedResponder::new(NoAdditionalChecks)));
        node.register_responder(STRICT_PROTOCOL, Arc::new(CoordinatedResponder::new(refuse)));
        node.register_responder(FORGING_PROTOCOL, Arc::new(ForgedSignature));
    }
    (net, nodes)
}

fn usd(issuer: &Node) -> IssuedTokenType {
    IssuedTokenType::new(issuer.party().clone(), TokenType::usd())
}

async fn issue(bank: &Node, to: &Node, amounts: &[u64]) -> SignedTransaction {
    let issued = usd(bank);
    let issuer = bank.party().owning_key;
    let stx = TransactionBuilder::new(bank.notary_party().clone())
        .add_output_states(
            amounts
                .iter()
                .map(|a| FungibleToken::new(issued.clone(), to.party().anonymise(), *a)),
        )
        .add_command(CommandData::token(TokenAction::Issue, issued.clone()), [issuer])
        .sign_initial(bank.keys(), &[issuer])
        .expect("sign");
    coordinate(bank, TOKEN_PROTOCOL, stx, &[]).await.expect("issue")
}

async fn pay(from: &Node, to: &Node, amount: u64) -> Result<SignedTransaction, FlowError> {
    let me = from.party().anonymise();
    let criteria = SelectionCriteria::new(TokenType::usd()).held_by(me.owning_key);
    let generated = TokenSelection::new(from.vault()).generate_move(&[(to.party().anonymise(), amount)], me, &criteria)?;
    spend(from, generated.inputs, generated.outputs).await
}

async fn spend(
    from: &Node,
    inputs: Vec<StateAndRef>,
    outputs: Vec<FungibleToken>,
) -> Result<SignedTransaction, FlowError> {
    let me = from.party().owning_key;
    let issued = outputs[0].issued.clone();
    let stx = TransactionBuilder::new(from.notary_party().clone())
        .add_input_states(inputs)
        .add_output_states(outputs)
        .add_command(CommandData::token(TokenAction::Move, issued), [me])
        .sign_initial(from.keys(), &[me])?;
    coordinate(from, TOKEN_PROTOCOL, stx, &[]).await
}

fn holdings(node: &Node) -> Vec<StateAndRef> {
    node.vault()
        .query_all(&QueryCriteria::unconsumed().of_type(StateType::Fungible))
        .expect("query")
        .into_iter()
        .filter(|s| {
            s.get::<FungibleToken>()
                .is_some_and(|t| node.keys().is_mine(&t.holder.owning_key))
        })
        .collect()
}

fn balance(node: &Node) -> u64 {
    holdings(node)
        .iter()
        .filter_map(|s| s.get::<FungibleToken>())
        .map(|t| t.amount)
        .sum()
}

/// Every node holds `stx`, and the nodes that track one of its states
/// agree on it: inputs consumed, outputs current. Some node must track
/// each input.
fn assert_recorded_consistently(nodes: &[&Arc<Node>], stx: &SignedTransaction) {
    let id = stx.id();
    for node in nodes {
        assert!(
            node.vault().transaction(&id).unwrap().is_some(),
            "{} has no record of {}",
            node.party(),
            id.short()
        );
    }
    let outputs = (0..stx.tx().outputs.len() as u32).map(|i| (StateRef::new(id, i), false));
    let inputs = stx.tx().inputs.iter().map(|r| (*r, true));
    for (reference, consumed) in inputs.chain(outputs) {
        let statuses: Vec<Option<bool>> = nodes
            .iter()
            .map(|n| n.vault().is_consumed(&reference).unwrap())
            .collect();
        if consumed {
            assert!(statuses.iter().any(Option::is_some), "nobody tracks input {reference:?}");
        }
        assert!(
            statuses.iter().flatten().all(|c| *c == consumed),
            "disagreement over {reference:?}: {statuses:?}"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn issued_tokens_reach_the_holder() {
    let (net, nodes) = network(&["Bank", "Alice"]);
    let (bank, alice) = (&nodes[0], &nodes[1]);

    let stx = issue(bank, alice, &[60, 40]).await;

    assert_eq!(balance(alice), 100);
    assert!(alice.vault().has_transaction(&stx.id()).unwrap());
    assert!(stx.signing_keys().contains(&net.notary_party().owning_key));
    assert_recorded_consistently(&[bank, alice], &stx);
    net.stop_nodes();
}

#[tokio::test]
async fn payment_returns_change_to_the_payer() {
    let (net, nodes) = network(&["Bank", "Alice", "Bob"]);
    let (bank, alice, bob) = (&nodes[0], &nodes[1], &nodes[2]);
    issue(bank, alice, &[60, 40]).await;

    let paid = pay(alice, bob, 70).await.unwrap();

    assert_eq!(balance(alice), 30);
    assert_eq!(balance(bob), 70);
    assert_recorded_consistently(&[alice, bob], &paid);
    let err = pay(alice, bob, 31).await.unwrap_err();
    assert!(matches!(err, FlowError::InsufficientFunds { requested: 31, available: 30 }), "{err}");
    net.stop_nodes();
}

#[tokio::test]
async fn spending_a_consumed_input_conflicts() {
    let (net, nodes) = network(&["Bank", "Alice", "Bob", "Carol"]);
    let (bank, alice, bob, carol) = (&nodes[0], &nodes[1], &nodes[2], &nodes[3]);
    issue(bank, alice, &[100]).await;
    let stale = holdings(alice);
    assert_eq!(stale.len(), 1);

    let paid = pay(alice, bob, 100).await.unwrap();
    assert_recorded_consistently(&[alice, bob], &paid);

    let to_carol = vec![FungibleToken::new(usd(bank), carol.party().anonymise(), 100)];
    let err = spend(alice, stale, to_carol).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert_eq!(balance(bob), 100);
    assert_eq!(balance(carol), 0);
    assert_eq!(net.notary().consumed_by(&paid.tx().inputs[0]), Some(paid.id()));
    net.stop_nodes();
}

#[tokio::test]
async fn counterparty_signatures_are_collected() {
    let (net, nodes) = network(&["Bank", "Alice", "Bob"]);
    let (bank, alice, bob) = (&nodes[0], &nodes[1], &nodes[2]);
    let issued = usd(bank);
    let keys = [alice.party().owning_key, bob.party().owning_key];

    let build = |protocol: &'static str| {
        let stx = TransactionBuilder::new(alice.notary_party().clone())
            .add_output_state(FungibleToken::new(issued.clone(), alice.party().anonymise(), 1))
            .add_command(CommandData::token(TokenAction::Issue, issued.clone()), keys)
            .sign_initial(alice.keys(), &keys[..1])
            .unwrap();
        coordinate(alice, protocol, stx, &[])
    };

    let done = build(TOKEN_PROTOCOL).await.unwrap();
    assert!(done.signing_keys().contains(&bob.party().owning_key));
    assert!(done.missing_signers().is_empty());
    assert_recorded_consistently(&[alice, bob], &done);

    let err = build(STRICT_PROTOCOL).await.unwrap_err();
    assert!(matches!(err, FlowError::RejectedTransaction(_)), "{err}");
    net.stop_nodes();
}

#[tokio::test]
async fn expired_time_window_is_not_notarised() {
    let (net, nodes) = network(&["Bank", "Alice"]);
    let (bank, alice) = (&nodes[0], &nodes[1]);
    let issued = usd(bank);
    let issuer = bank.party().owning_key;
    let until = net.clock().now() - ChronoDuration::seconds(1);

    let stx = TransactionBuilder::new(bank.notary_party().clone())
        .add_output_state(FungibleToken::new(issued.clone(), alice.party().anonymise(), 5))
        .add_command(CommandData::token(TokenAction::Issue, issued), [issuer])
        .set_time_window(TimeWindow::until_only(until))
        .sign_initial(bank.keys(), &[issuer])
        .unwrap();

    let err = coordinate(bank, TOKEN_PROTOCOL, stx, &[]).await.unwrap_err();
    assert!(matches!(err, FlowError::ValidationFailure(_)), "{err}");
    assert_eq!(balance(alice), 0);
    net.stop_nodes();
}

#[tokio::test]
async fn forged_counterparty_signature_stops_the_transaction() {
    let (net, nodes) = network(&["Bank", "Alice", "Bob"]);
    let (bank, alice, bob) = (&nodes[0], &nodes[1], &nodes[2]);
    issue(bank, alice, &[25]).await;
    let input = holdings(alice).remove(0);
    let input_ref = input.reference;
    let issued = usd(bank);
    let keys = [alice.party().owning_key, bob.party().owning_key];

    let stx = TransactionBuilder::new(alice.notary_party().clone())
        .add_input_state(input)
        .add_output_state(FungibleToken::new(issued.clone(), bob.party().anonymise(), 25))
        .add_command(CommandData::token(TokenAction::Move, issued), keys)
        .sign_initial(alice.keys(), &keys[..1])
        .unwrap();
    let id = stx.id();

    let err = coordinate(alice, FORGING_PROTOCOL, stx, &[]).await.unwrap_err();
    assert!(
        matches!(err, FlowError::ValidationFailure(_) | FlowError::RejectedTransaction(_)),
        "{err}"
    );
    assert_eq!(net.notary().consumed_by(&input_ref), None);
    assert!(!alice.vault().has_transaction(&id).unwrap());
    assert_eq!(alice.vault().is_consumed(&input_ref).unwrap(), Some(false));
    assert_eq!(balance(alice), 25);
    assert_eq!(balance(bob), 0);
    net.stop_nodes();
}

#[tokio::test]
async fn unacknowledged_deliveries_are_reported() {
    let (net, nodes) = network(&["Bank", "Alice", "Bob"]);
    let (bank, alice, bob) = (&nodes[0], &nodes[1], &nodes[2]);
    alice.register_responder(DELIVERY_PROTOCOL, Arc::new(CoordinatedResponder::new(NoAdditionalChecks)));
    bob.register_responder(DELIVERY_PROTOCOL, Arc::new(RefuseDelivery));

    let issued = usd(bank);
    let issuer = bank.party().owning_key;
    let stx = TransactionBuilder::new(bank.notary_party().clone())
        .add_output_state(FungibleToken::new(issued.clone(), alice.party().anonymise(), 5))
        .add_output_state(FungibleToken::new(issued.clone(), bob.party().anonymise(), 5))
        .add_command(CommandData::token(TokenAction::Issue, issued), [issuer])
        .sign_initial(bank.keys(), &[issuer])
        .unwrap();
    let finalized = coordinate_finalized(bank, DELIVERY_PROTOCOL, stx, &[]).await.unwrap();

    assert!(!finalized.is_fully_delivered());
    assert_eq!(finalized.unacknowledged, vec![bob.party().clone()]);
    assert_recorded_consistently(&[bank, alice], &finalized.transaction);
    assert!(!bob.vault().has_transaction(&finalized.transaction.id()).unwrap());
    assert_eq!(balance(alice), 5);
    net.stop_nodes();
}
