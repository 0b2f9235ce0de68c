//! The reviewing side of signature collection.
//!
//! A reviewer never signs on the proposer's word. It resolves the
//! proposal against the shipped dependencies, runs the contract verifier,
//! works out from the transaction alone which of its own keys are
//! implicated, and only then runs the application's own checks. Any
//! failure ends the session without a signature and without writing to
//! the vault.

use std::collections::BTreeSet;
use tracing::{info, warn};

use super::error::FlowError;
use super::identity_sync::sync_keys_handler;
use super::resolve::{check_dependencies, require_network_notary, DependencyOverlay};
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::Party;
use crate::network::{Node, Session, WireMessage};
use crate::transaction::{LedgerTransaction, SignedTransaction};

/// What an [`AdditionalCheck`] gets to look at.
pub struct SigningContext<'a> {
    pub node: &'a Node,
    pub stx: &'a SignedTransaction,
    pub ltx: &'a LedgerTransaction,
    /// Our keys among the transaction's required signers.
    pub my_keys: &'a BTreeSet<PublicKey>,
    pub counterparty: &'a Party,
}

/// Application-specific checks run before signing.
///
/// Closures work directly:
///
/// ```ignore
/// let check = |ctx: &SigningContext<'_>| {
///     if ctx.ltx.inputs.len() == 1 { Ok(()) } else { Err(FlowError::RejectedTransaction("one input".into())) }
/// };
/// ```
pub trait AdditionalCheck: Send + Sync {
    fn check(&self, ctx: &SigningContext<'_>) -> Result<(), FlowError>;
}

impl<F> AdditionalCheck for F
where
    F: Fn(&SigningContext<'_>) -> Result<(), FlowError> + Send + Sync,
{
    fn check(&self, ctx: &SigningContext<'_>) -> Result<(), FlowError> {
        self(ctx)
    }
}

/// Signs anything that passes the built-in checks.
pub struct NoAdditionalChecks;

impl AdditionalCheck for NoAdditionalChecks {
    fn check(&self, _ctx: &SigningContext<'_>) -> Result<(), FlowError> {
        Ok(())
    }
}

/// Review a proposal arriving on `session` and sign it if it passes.
/// Returns the id of the signed transaction.
pub async fn sign_transaction(
    node: &Node,
    session: &mut Session,
    check: &dyn AdditionalCheck,
) -> Result<SecureHash, FlowError> {
    let (stx, dependencies) = match session.receive().await? {
        WireMessage::Proposal {
            transaction,
            dependencies,
        } => (transaction, dependencies),
        other => return Err(FlowError::unexpected("Proposal", &other)),
    };
    sync_keys_handler(node, session).await?;

    let tx_id = stx.id();
    let counterparty = session.counterparty().clone();
    match review(node, &stx, &dependencies, &counterparty, check) {
        Ok(my_keys) => {
            let sigs = my_keys
                .iter()
                .map(|k| node.keys().sign(k, &tx_id))
                .collect::<Result<Vec<_>, _>>()?;
            session.send(WireMessage::Signatures(sigs)).await?;
            info!(
                tx_id = %tx_id.short(),
                party = %node.party(),
                counterparty = %counterparty,
                keys = my_keys.len(),
                "transaction signed"
            );
            Ok(tx_id)
        }
        Err(e) => {
            warn!(
                tx_id = %tx_id.short(),
                party = %node.party(),
                counterparty = %counterparty,
                error = %e,
                "refusing to sign"
            );
            Err(e)
        }
    }
}

fn review(
    node: &Node,
    stx: &SignedTransaction,
    dependencies: &[SignedTransaction],
    counterparty: &Party,
    check: &dyn AdditionalCheck,
) -> Result<BTreeSet<PublicKey>, FlowError> {
    require_network_notary(node, stx.tx()).map_err(FlowError::RejectedTransaction)?;
    check_dependencies(node, dependencies)?;
    stx.check_signatures_are_valid()?;

    let overlay = DependencyOverlay::new(node.vault(), dependencies);
    let ltx = stx.tx().to_ledger_transaction(&overlay)?;
    node.verifier().verify(&ltx)?;

    let my_keys = node.keys().filter_mine(&stx.required_signing_keys());
    if my_keys.is_empty() {
        return Err(FlowError::RejectedTransaction(
            "none of our keys is a required signer".into(),
        ));
    }
    let already_signed = stx.signing_keys();
    if let Some(key) = my_keys.iter().find(|k| already_signed.contains(*k)) {
        return Err(FlowError::RejectedTransaction(format!(
            "our key {} already signed a transaction we never saw",
            key.short()
        )));
    }

    let ctx = SigningContext {
        node,
        stx,
        ltx: &ltx,
        my_keys: &my_keys,
        counterparty,
    };
    check.check(&ctx).map_err(|e| match e {
        FlowError::RejectedTransaction(_) => e,
        other => FlowError::RejectedTransaction(other.to_string()),
    })?;
    Ok(my_keys)
}
