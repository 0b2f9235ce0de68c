//! An in-process network for tests and demonstrations.
//!
//! Every node gets a temporary vault, a fresh legal identity key and an
//! inbox in a shared [`Directory`]. All nodes share one network map, one
//! clock and one [`SimpleNotary`].

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::node::{Directory, Node, NodeServices};
use crate::clock::{Clock, TokioClock};
use crate::config::NodeConfig;
use crate::crypto::KeyPair;
use crate::identity::{IdentityService, KeyManager, NetworkMap, Party};
use crate::notary::SimpleNotary;
use crate::transaction::ContractVerifier;
use crate::vault::{Vault, VaultError};

pub struct MockNetwork {
    directory: Arc<Directory>,
    network_map: Arc<NetworkMap>,
    notary: Arc<SimpleNotary>,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn ContractVerifier>,
    config: NodeConfig,
    nodes: RwLock<Vec<Arc<Node>>>,
}

impl MockNetwork {
    pub fn new(verifier: Arc<dyn ContractVerifier>) -> Self {
        Self::with_config(verifier, NodeConfig::default())
    }

    pub fn with_config(verifier: Arc<dyn ContractVerifier>, config: NodeConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let notary = Arc::new(SimpleNotary::new("Notary", KeyPair::generate(), Arc::clone(&clock)));
        let network_map = Arc::new(NetworkMap::new());
        network_map.register(notary.party().clone());
        Self {
            directory: Arc::new(Directory::new()),
            network_map,
            notary,
            clock,
            verifier,
            config,
            nodes: RwLock::new(Vec::new()),
        }
    }

    pub fn notary(&self) -> &Arc<SimpleNotary> {
        &self.notary
    }

    pub fn notary_party(&self) -> &Party {
        self.notary.party()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn network_map(&self) -> &Arc<NetworkMap> {
        &self.network_map
    }

    /// Create, register and start a node. Must run inside a tokio runtime.
    pub fn create_node(&self, name: &str) -> Result<Arc<Node>, VaultError> {
        let keys = Arc::new(KeyManager::new());
        let party = Party::new(name, keys.fresh_key());
        self.network_map.register(party.clone());
        let services = NodeServices {
            party,
            keys: Arc::clone(&keys),
            identity: Arc::new(IdentityService::new(Arc::clone(&self.network_map))),
            vault: Arc::new(Vault::open_temporary(keys)?),
            notary: self.notary.clone(),
            verifier: Arc::clone(&self.verifier),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        };
        let node = Node::new(services, Arc::clone(&self.directory));
        node.start();
        info!(party = %node.party(), "mock node joined");
        self.nodes.write().push(Arc::clone(&node));
        Ok(node)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn stop_nodes(&self) {
        for node in self.nodes.read().iter() {
            node.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::FlowError;
    use crate::network::{ErrorKind, FlowResponder, Session, SessionError, WireMessage};
    use crate::transaction::{LedgerTransaction, VerificationError};
    use async_trait::async_trait;

    struct AcceptAll;

    impl ContractVerifier for AcceptAll {
        fn verify(&self, _tx: &LedgerTransaction) -> Result<(), VerificationError> {
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl FlowResponder for Echo {
        async fn respond(&self, _node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
            let message = session.receive().await?;
            session.send(message).await?;
            Ok(())
        }
    }

    struct Refuse;

    #[async_trait]
    impl FlowResponder for Refuse {
        async fn respond(&self, _node: Arc<Node>, _session: &mut Session) -> Result<(), FlowError> {
            Err(FlowError::RejectedTransaction("refused".into()))
        }
    }

    #[tokio::test]
    async fn sessions_reach_registered_responders() {
        let network = MockNetwork::new(Arc::new(AcceptAll));
        let alice = network.create_node("Alice").unwrap();
        let bob = network.create_node("Bob").unwrap();
        bob.register_responder("echo", Arc::new(Echo));

        let mut session = alice.initiate(bob.party(), "echo").await.unwrap();
        let reply = session.send_and_receive(WireMessage::Ack).await.unwrap();
        assert!(matches!(reply, WireMessage::Ack));
    }

    #[tokio::test]
    async fn responder_errors_come_back_as_error_frames() {
        let network = MockNetwork::new(Arc::new(AcceptAll));
        let alice = network.create_node("Alice").unwrap();
        let bob = network.create_node("Bob").unwrap();
        bob.register_responder("refuse", Arc::new(Refuse));

        let mut session = alice.initiate(bob.party(), "refuse").await.unwrap();
        let err = FlowError::from(session.receive().await.unwrap_err());
        assert!(matches!(err, FlowError::RejectedTransaction(_)));
    }

    #[tokio::test]
    async fn unknown_protocol_is_reported() {
        let network = MockNetwork::new(Arc::new(AcceptAll));
        let alice = network.create_node("Alice").unwrap();
        let bob = network.create_node("Bob").unwrap();
        let mut session = alice.initiate(bob.party(), "nothing-here").await.unwrap();
        assert!(matches!(
            session.receive().await,
            Err(SessionError::Remote {
                kind: ErrorKind::UnknownProtocol,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn parties_are_resolvable_network_wide() {
        let network = MockNetwork::new(Arc::new(AcceptAll));
        let alice = network.create_node("Alice").unwrap();
        let bob = network.create_node("Bob").unwrap();
        assert_eq!(
            alice.identity().party_by_name("Bob").unwrap(),
            bob.party().clone()
        );
        assert_eq!(
            bob.identity().require_host(&network.notary_party().owning_key).unwrap(),
            network.notary_party().clone()
        );
    }
}
