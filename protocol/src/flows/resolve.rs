//! Shipping and checking the transactions a proposal depends on.
//!
//! A proposal travels with its back-chain: every transaction reachable by
//! walking inputs and references back to issuance. The receiver checks each
//! one it has not seen before and resolves against them without touching
//! its vault, so a rejected proposal leaves nothing behind.
//!
//! ```text
//!   issue ──▶ move ──▶ move ──▶ proposal
//!     │         │        │
//!     └─────────┴────────┴──▶ shipped, each checked:
//!                              notary is ours, fully signed,
//!                              inputs resolve, contracts pass
//! ```

use std::collections::{BTreeSet, HashMap};

use super::error::FlowError;
use crate::crypto::SecureHash;
use crate::ledger::{StateRef, TransactionState};
use crate::network::Node;
use crate::transaction::{SignedTransaction, StateLoader, WireTransaction};
use crate::vault::{Vault, VaultError};

/// The back-chain of `wtx`: the creating transactions of its inputs and
/// references, theirs in turn, down to issuance. Read from the local vault.
pub fn dependencies_of(vault: &Vault, wtx: &WireTransaction) -> Result<Vec<SignedTransaction>, FlowError> {
    let mut pending: Vec<SecureHash> = direct_dependencies(wtx).into_iter().collect();
    let mut seen: BTreeSet<SecureHash> = pending.iter().copied().collect();
    let mut chain = Vec::new();

    while let Some(id) = pending.pop() {
        let dep = vault
            .transaction(&id)?
            .ok_or_else(|| FlowError::NotFound(format!("dependency {}", id.short())))?;
        for parent in direct_dependencies(dep.tx()) {
            if seen.insert(parent) {
                pending.push(parent);
            }
        }
        chain.push(dep);
    }
    Ok(chain)
}

fn direct_dependencies(wtx: &WireTransaction) -> BTreeSet<SecureHash> {
    wtx.inputs.iter().chain(&wtx.references).map(|r| r.txhash).collect()
}

/// Check every shipped dependency `node` has not already recorded.
///
/// Each must name the network notary, carry every required signature,
/// resolve its own inputs from the batch or the vault and pass the node's
/// contract verifier.
pub fn check_dependencies(node: &Node, dependencies: &[SignedTransaction]) -> Result<(), FlowError> {
    let overlay = DependencyOverlay::new(node.vault(), dependencies);
    for dep in dependencies {
        let dep_id = dep.id();
        if node.vault().has_transaction(&dep_id)? {
            continue;
        }
        let failed = |reason: String| FlowError::ValidationFailure(format!("dependency {}: {}", dep_id.short(), reason));

        require_network_notary(node, dep.tx()).map_err(failed)?;
        dep.verify_required_signatures()
            .map_err(|e| failed(e.to_string()))?;
        let ltx = dep
            .tx()
            .to_ledger_transaction(&overlay)
            .map_err(|e| failed(e.to_string()))?;
        node.verifier()
            .verify(&ltx)
            .map_err(|e| failed(e.to_string()))?;
    }
    Ok(())
}

/// The transaction and every state it creates must name the network notary.
pub fn require_network_notary(node: &Node, wtx: &WireTransaction) -> Result<(), String> {
    let ours = node.notary_party();
    match &wtx.notary {
        Some(named) if named == ours => {}
        Some(named) => return Err(format!("names notary {named}, not {ours}")),
        None => return Err("names no notary".into()),
    }
    if let Some(stray) = wtx.outputs.iter().find(|s| &s.notary != ours) {
        return Err(format!("creates a state under notary {}", stray.notary));
    }
    Ok(())
}

/// Resolves states from shipped dependencies first, then the vault.
pub struct DependencyOverlay<'a> {
    vault: &'a Vault,
    dependencies: HashMap<SecureHash, &'a SignedTransaction>,
}

impl<'a> DependencyOverlay<'a> {
    pub fn new(vault: &'a Vault, dependencies: &'a [SignedTransaction]) -> Self {
        Self {
            vault,
            dependencies: dependencies.iter().map(|d| (d.id(), d)).collect(),
        }
    }
}

impl StateLoader for DependencyOverlay<'_> {
    fn load_state(&self, reference: &StateRef) -> Result<Option<TransactionState>, VaultError> {
        match self.dependencies.get(&reference.txhash) {
            Some(dep) => Ok(dep.tx().outputs.get(reference.index as usize).cloned()),
            None => self.vault.load_state(reference),
        }
    }
}
