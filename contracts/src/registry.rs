//! # Contract Registry
//!
//! The protocol knows one verifier; the application knows several
//! contracts. The registry runs every contract over every transaction and
//! fails on the first rejection. A contract that finds nothing of its own
//! in a transaction accepts it.
//!
//! Every command must be claimed by some registered contract, so a
//! directive nobody understands cannot slip through unverified.

use tracing::debug;

use accord_protocol::transaction::{
    require_that, CommandData, ContractVerifier, LedgerTransaction, VerificationError,
};

use crate::asset_type::AssetTypeContract;
use crate::due_diligence::DueDiligenceContract;
use crate::sales_proposal::SalesProposalContract;
use crate::token::TokenContract;

/// One family of business rules.
pub trait Contract: Send + Sync {
    /// Short name used in rejection messages.
    fn name(&self) -> &'static str;

    /// Whether `command` is one of this contract's directives.
    fn claims(&self, command: &CommandData) -> bool;

    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError>;
}

/// An ordered set of contracts acting as a single [`ContractVerifier`].
pub struct ContractRegistry {
    contracts: Vec<Box<dyn Contract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self {
            contracts: Vec::new(),
        }
    }

    /// Every contract this crate defines.
    pub fn standard() -> Self {
        Self::new()
            .with(TokenContract)
            .with(AssetTypeContract)
            .with(SalesProposalContract)
            .with(DueDiligenceContract)
    }

    pub fn with(mut self, contract: impl Contract + 'static) -> Self {
        self.contracts.push(Box::new(contract));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.contracts.iter().map(|c| c.name()).collect()
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ContractVerifier for ContractRegistry {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        for command in &tx.commands {
            let claimed = self.contracts.iter().any(|c| c.claims(&command.value));
            require_that(
                claimed,
                "registry",
                &format!("no contract handles {}", command.value),
            )?;
        }
        for contract in &self.contracts {
            if let Err(e) = contract.verify(tx) {
                debug!(tx_id = %tx.id.short(), contract = contract.name(), error = %e, "contract rejected transaction");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("contracts", &self.names())
            .finish()
    }
}
