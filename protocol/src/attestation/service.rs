//! The attester's side: answer status queries and certify filtered
//! transactions.
//!
//! ```text
//!   FilteredTransaction
//!        │
//!        ├─ verify()                     ─ tampered / forged ─▶ ValidationFailure
//!        ├─ every element acceptable?    ─ no ───────────────▶ ValidationFailure
//!        ├─ our commands all visible?    ─ no ───────────────▶ DisclosureViolation
//!        └─ sign the transaction id
//! ```
//!
//! An element is acceptable when it is a `Certify` naming our key whose
//! status matches the fact table, or a time window that closes within the
//! freshness bound. Anything else revealed to us is refused.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::facts::FactStore;
use crate::clock::Clock;
use crate::crypto::{PublicKey, TransactionSignature};
use crate::flows::FlowError;
use crate::identity::KeyManager;
use crate::ledger::{DiligenceStatus, LinearId};
use crate::network::{FlowResponder, Node, Session, WireMessage};
use crate::transaction::{
    CommandData, DiligenceCommand, FilteredElement, FilteredTransaction, TimeWindow,
};

pub const CERTIFY_PROTOCOL: &str = "attestation.certify";
pub const QUERY_PROTOCOL: &str = "attestation.query";

pub struct AttestationService {
    key: PublicKey,
    keys: Arc<KeyManager>,
    facts: FactStore,
    clock: Arc<dyn Clock>,
    freshness: chrono::Duration,
}

impl AttestationService {
    pub fn new(key: PublicKey, keys: Arc<KeyManager>, clock: Arc<dyn Clock>, freshness: Duration) -> Self {
        Self {
            key,
            keys,
            facts: FactStore::new(),
            clock,
            freshness: chrono::Duration::from_std(freshness).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// An attester signing with `node`'s legal identity key.
    pub fn for_node(node: &Node) -> Self {
        Self::new(
            node.party().owning_key,
            Arc::clone(node.keys()),
            Arc::clone(node.clock()),
            node.config().attestation_freshness(),
        )
    }

    pub fn key(&self) -> PublicKey {
        self.key
    }

    pub fn query(&self, subject: &LinearId) -> DiligenceStatus {
        self.facts.get(subject)
    }

    pub fn set_status(&self, subject: LinearId, status: DiligenceStatus) {
        info!(subject = %subject, status = %status, "attested status updated");
        self.facts.set(subject, status);
    }

    fn acceptable(&self, element: &FilteredElement) -> bool {
        match element {
            FilteredElement::Command(command) => match &command.value {
                CommandData::Diligence(DiligenceCommand::Certify { token_id, status }) => {
                    command.requires(&self.key) && *status == self.query(token_id)
                }
                _ => false,
            },
            FilteredElement::TimeWindow(window) => self.is_fresh(window),
            _ => false,
        }
    }

    fn is_fresh(&self, window: &TimeWindow) -> bool {
        let bound = self.clock.now() + self.freshness;
        window.until.map_or(false, |until| until < bound)
    }

    /// Sign `ftx` if every revealed element is acceptable and nothing that
    /// names our key is hidden.
    pub fn certify(&self, ftx: &FilteredTransaction) -> Result<TransactionSignature, FlowError> {
        let tx_id = ftx.id;
        ftx.verify()
            .map_err(|e| FlowError::ValidationFailure(e.to_string()))?;

        if !ftx.check_with(|e| self.acceptable(e)) {
            warn!(tx_id = %tx_id.short(), "attestation refused: unacceptable element");
            return Err(FlowError::ValidationFailure(
                "attestation requested over content it cannot vouch for".into(),
            ));
        }
        if ftx.time_window().is_none() {
            return Err(FlowError::ValidationFailure(
                "attestation requires a disclosed time window".into(),
            ));
        }
        if !ftx.commands().iter().any(|c| c.value.is_certify()) {
            return Err(FlowError::ValidationFailure(
                "no certify command disclosed".into(),
            ));
        }
        ftx.check_command_visibility(&self.key).map_err(|e| {
            warn!(tx_id = %tx_id.short(), error = %e, "attestation refused: hidden command");
            FlowError::DisclosureViolation(e.to_string())
        })?;

        let sig = self.keys.sign(&self.key, &tx_id)?;
        info!(tx_id = %tx_id.short(), key = %self.key.short(), "attestation granted");
        Ok(sig)
    }
}

impl std::fmt::Debug for AttestationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationService")
            .field("key", &self.key)
            .field("facts", &self.facts.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

struct CertifyResponder(Arc<AttestationService>);

#[async_trait]
impl FlowResponder for CertifyResponder {
    async fn respond(&self, _node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
        let ftx = match session.receive().await? {
            WireMessage::FilteredTransaction(ftx) => ftx,
            other => return Err(FlowError::unexpected("FilteredTransaction", &other)),
        };
        let sig = self.0.certify(&ftx)?;
        session.send(WireMessage::AttestationSignature(sig)).await?;
        Ok(())
    }
}

struct QueryResponder(Arc<AttestationService>);

#[async_trait]
impl FlowResponder for QueryResponder {
    async fn respond(&self, _node: Arc<Node>, session: &mut Session) -> Result<(), FlowError> {
        let subject = match session.receive().await? {
            WireMessage::FactQuery(subject) => subject,
            other => return Err(FlowError::unexpected("FactQuery", &other)),
        };
        let status = self.0.query(&subject);
        debug!(subject = %subject, status = %status, from = %session.counterparty(), "status queried");
        session.send(WireMessage::FactStatus(status)).await?;
        Ok(())
    }
}

/// Make `node` an attester and return the service behind it.
pub fn install(node: &Node) -> Arc<AttestationService> {
    let service = Arc::new(AttestationService::for_node(node));
    node.register_responder(CERTIFY_PROTOCOL, Arc::new(CertifyResponder(Arc::clone(&service))));
    node.register_responder(QUERY_PROTOCOL, Arc::new(QueryResponder(Arc::clone(&service))));
    info!(party = %node.party(), "attestation service installed");
    service
}
