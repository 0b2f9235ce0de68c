//! Shared fixture: a mock network with the application installed on
//! every node.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use accord_contracts::{install, verifier, AppServices};
use accord_protocol::attestation::{self, AttestationService};
use accord_protocol::identity::AbstractParty;
use accord_protocol::ledger::{FungibleToken, IssuedTokenType, StateRef, StateType, TokenType};
use accord_protocol::network::{MockNetwork, Node};
use accord_protocol::transaction::SignedTransaction;
use accord_protocol::vault::QueryCriteria;

pub struct TestNetwork {
    pub net: MockNetwork,
    pub bank: Arc<Node>,
    pub dmv: Arc<Node>,
    pub alice: Arc<Node>,
    pub bob: Arc<Node>,
    pub carol: Arc<Node>,
    pub oracle: Arc<Node>,
    pub attester: Arc<AttestationService>,
    pub services: Vec<AppServices>,
}

impl TestNetwork {
    pub fn start() -> Self {
        let net = MockNetwork::new(verifier());
        let node = |name: &str| net.create_node(name).expect("node");
        let (bank, dmv, alice, bob, carol, oracle) = (
            node("Bank"),
            node("Dmv"),
            node("Alice"),
            node("Bob"),
            node("Carol"),
            node("Oracle"),
        );
        let services = [&bank, &dmv, &alice, &bob, &carol, &oracle]
            .into_iter()
            .map(|n| install(n).expect("install"))
            .collect();
        let attester = attestation::install(&oracle);
        Self {
            net,
            bank,
            dmv,
            alice,
            bob,
            carol,
            oracle,
            attester,
            services,
        }
    }

    pub fn usd(&self) -> IssuedTokenType {
        IssuedTokenType::new(self.bank.party().clone(), TokenType::usd())
    }

    pub fn shutdown(&self) {
        for services in &self.services {
            services.stop();
        }
        self.net.stop_nodes();
    }
}

pub fn holder(node: &Node) -> AbstractParty {
    node.party().anonymise()
}

/// Unconsumed fungible `token_type` held by `node`'s keys.
pub fn balance(node: &Node, token_type: &TokenType) -> u64 {
    let criteria = QueryCriteria::unconsumed()
        .of_type(StateType::Fungible)
        .token_type(token_type.clone());
    node.vault()
        .query_all(&criteria)
        .expect("query")
        .iter()
        .filter_map(|s| s.get::<FungibleToken>())
        .filter(|t| node.keys().is_mine(&t.holder.owning_key))
        .map(|t| t.amount)
        .sum()
}

/// Poll `condition` until it holds or a generous deadline passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Every node holds `stx`, and the nodes that track one of its states
/// agree on it: inputs consumed, outputs current. Some node must track
/// each input.
pub fn assert_recorded_consistently(nodes: &[&Arc<Node>], stx: &SignedTransaction) {
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
