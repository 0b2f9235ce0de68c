//! Rules for evolvable asset descriptions.
//!
//! `Create` produces one description from nothing. `Update` replaces one
//! description with its successor, keeping its linear id and its
//! maintainers. Either way every maintainer signs.

use std::collections::BTreeSet;

use accord_protocol::crypto::PublicKey;
use accord_protocol::ledger::AssetType;
use accord_protocol::transaction::{
    require_that, AssetTypeCommand, Command, CommandData, LedgerTransaction, VerificationError,
};

use crate::registry::Contract;

pub const ASSET_TYPE_CONTRACT: &str = "asset-type";

#[derive(Debug, Clone, Copy, Default)]
pub struct AssetTypeContract;

fn maintainer_keys(asset: &AssetType) -> BTreeSet<PublicKey> {
    asset.maintainers.iter().map(|p| p.owning_key).collect()
}

fn require_maintainers_sign(command: &Command, asset: &AssetType) -> Result<(), VerificationError> {
    require_that(
        maintainer_keys(asset).iter().all(|k| command.requires(k)),
        ASSET_TYPE_CONTRACT,
        "every maintainer must sign",
    )
}

impl Contract for AssetTypeContract {
    fn name(&self) -> &'static str {
        ASSET_TYPE_CONTRACT
    }

    fn claims(&self, command: &CommandData) -> bool {
        matches!(command, CommandData::AssetType(_))
    }

    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        let inputs = tx.inputs_of::<AssetType>();
        let outputs = tx.outputs_of::<AssetType>();
        let commands = tx.commands_where(|c| self.claims(c));
        if inputs.is_empty() && outputs.is_empty() && commands.is_empty() {
            return Ok(());
        }
        require_that(
            commands.len() == 1,
            ASSET_TYPE_CONTRACT,
            "expected exactly one asset type command",
        )?;
        let command = commands[0];

        match command.value {
            CommandData::AssetType(AssetTypeCommand::Create) => {
                require_that(inputs.is_empty(), ASSET_TYPE_CONTRACT, "creation consumes no description")?;
                require_that(outputs.len() == 1, ASSET_TYPE_CONTRACT, "creation produces one description")?;
                let created = outputs[0];
                require_that(
                    !created.maintainers.is_empty(),
                    ASSET_TYPE_CONTRACT,
                    "a description needs maintainers",
                )?;
                require_that(
                    !created.identifier.trim().is_empty(),
                    ASSET_TYPE_CONTRACT,
                    "a description needs an identifier",
                )?;
                require_maintainers_sign(command, created)
            }
            CommandData::AssetType(AssetTypeCommand::Update) => {
                require_that(inputs.len() == 1, ASSET_TYPE_CONTRACT, "an update consumes one description")?;
                require_that(outputs.len() == 1, ASSET_TYPE_CONTRACT, "an update produces one description")?;
                let (before, after) = (inputs[0], outputs[0]);
                require_that(
                    before.linear_id == after.linear_id,
                    ASSET_TYPE_CONTRACT,
                    "an update keeps the linear id",
                )?;
                require_that(
                    maintainer_keys(before) == maintainer_keys(after),
                    ASSET_TYPE_CONTRACT,
                    "an update keeps the maintainers",
                )?;
                require_that(before != after, ASSET_TYPE_CONTRACT, "an update must change something")?;
                require_maintainers_sign(command, before)
            }
            _ => Ok(()),
        }
    }
}
