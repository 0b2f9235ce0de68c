//! A participant: its identity, keys, vault and collaborators, plus the
//! dispatcher that hands incoming sessions to registered responders.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::ErrorKind;
use super::session::{Session, SessionError};
use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::crypto::PublicKey;
use crate::flows::FlowError;
use crate::identity::{IdentityService, KeyManager, Party};
use crate::notary::NotaryService;
use crate::transaction::ContractVerifier;
use crate::vault::Vault;

/// A session opened by a peer, waiting to be dispatched.
#[derive(Debug)]
pub struct IncomingSession {
    pub protocol: String,
    pub session: Session,
}

/// Inboxes of every reachable participant, keyed by legal identity key.
pub type Directory = DashMap<PublicKey, mpsc::Sender<IncomingSession>>;

/// Handles the responding side of one protocol.
#[async_trait]
pub trait FlowResponder: Send + Sync {
    async fn respond(&self, node: Arc<Node>, session: &mut Session) -> Result<(), FlowError>;
}

/// Everything a node is built from.
pub struct NodeServices {
    pub party: Party,
    pub keys: Arc<KeyManager>,
    pub identity: Arc<IdentityService>,
    pub vault: Arc<Vault>,
    pub notary: Arc<dyn NotaryService>,
    pub verifier: Arc<dyn ContractVerifier>,
    pub clock: Arc<dyn Clock>,
    pub config: NodeConfig,
}

pub struct Node {
    party: Party,
    keys: Arc<KeyManager>,
    identity: Arc<IdentityService>,
    vault: Arc<Vault>,
    notary: Arc<dyn NotaryService>,
    verifier: Arc<dyn ContractVerifier>,
    clock: Arc<dyn Clock>,
    config: NodeConfig,
    responders: RwLock<HashMap<String, Arc<dyn FlowResponder>>>,
    directory: Arc<Directory>,
    inbox: Mutex<Option<mpsc::Receiver<IncomingSession>>>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    /// Create a node and register its inbox in `directory`. The node does
    /// not serve sessions until [`start`](Self::start) is called.
    pub fn new(services: NodeServices, directory: Arc<Directory>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(services.config.session_channel_capacity);
        directory.insert(services.party.owning_key, tx);
        let (shutdown, _) = watch::channel(false);
        info!(party = %services.party, key = %services.party.owning_key.short(), "node created");
        Arc::new(Self {
            party: services.party,
            keys: services.keys,
            identity: services.identity,
            vault: services.vault,
            notary: services.notary,
            verifier: services.verifier,
            clock: services.clock,
            config: services.config,
            responders: RwLock::new(HashMap::new()),
            directory,
            inbox: Mutex::new(Some(rx)),
            shutdown,
        })
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn identity(&self) -> &Arc<IdentityService> {
        &self.identity
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn notary(&self) -> &dyn NotaryService {
        self.notary.as_ref()
    }

    pub fn notary_party(&self) -> &Party {
        self.notary.identity()
    }

    pub fn verifier(&self) -> &dyn ContractVerifier {
        self.verifier.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// A fresh pseudonymous key, already mapped to this node.
    pub fn fresh_key(&self) -> PublicKey {
        let key = self.keys.fresh_key();
        self.identity.register_key(key, self.party.clone());
        key
    }

    pub fn register_responder(&self, protocol: &str, responder: Arc<dyn FlowResponder>) {
        debug!(party = %self.party, protocol, "responder registered");
        self.responders.write().insert(protocol.to_string(), responder);
    }

    fn responder(&self, protocol: &str) -> Option<Arc<dyn FlowResponder>> {
        self.responders.read().get(protocol).cloned()
    }

    /// Open a session with `counterparty` for `protocol`.
    pub async fn initiate(&self, counterparty: &Party, protocol: &str) -> Result<Session, SessionError> {
        let inbox = self
            .directory
            .get(&counterparty.owning_key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::UnknownParty(counterparty.name.clone()))?;
        let (ours, theirs) = Session::pair(
            protocol,
            self.party.clone(),
            counterparty.clone(),
            self.config.session_channel_capacity,
        );
        inbox
            .send(IncomingSession {
                protocol: protocol.to_string(),
                session: theirs,
            })
            .await
            .map_err(|_| SessionError::Closed {
                counterparty: counterparty.name.clone(),
            })?;
        debug!(
            party = %self.party,
            counterparty = %counterparty,
            protocol,
            session = %ours.id(),
            "session opened"
        );
        Ok(ours)
    }

    /// Serve incoming sessions until [`stop`](Self::stop). Each session
    /// runs in its own task. Calling `start` twice returns `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut inbox = self.inbox.lock().take()?;
        let mut shutdown = self.shutdown.subscribe();
        let node = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!(party = %node.party, "node dispatcher starting");
            loop {
                tokio::select! {
                    incoming = inbox.recv() => {
                        let Some(incoming) = incoming else { break };
                        node.dispatch(incoming);
                    }
                    _ = shutdown.changed() => {
                        info!(party = %node.party, "node dispatcher shutting down");
                        break;
                    }
                }
            }
        }))
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    fn dispatch(self: &Arc<Self>, incoming: IncomingSession) {
        let IncomingSession { protocol, mut session } = incoming;
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let Some(responder) = node.responder(&protocol) else {
                warn!(party = %node.party, protocol = %protocol, "no responder for protocol");
                let _ = session
                    .send_error(ErrorKind::UnknownProtocol, format!("no responder for {}", protocol))
                    .await;
                return;
            };
            debug!(
                party = %node.party,
                counterparty = %session.counterparty(),
                protocol = %protocol,
                "responder started"
            );
            if let Err(e) = responder.respond(Arc::clone(&node), &mut session).await {
                warn!(
                    party = %node.party,
                    counterparty = %session.counterparty(),
                    protocol = %protocol,
                    error = %e,
                    "responder failed"
                );
                // The initiator may already be gone; nothing more to do then.
                let _ = session.send_error(e.kind(), e.to_string()).await;
            }
        });
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("party", &self.party).finish()
    }
}
