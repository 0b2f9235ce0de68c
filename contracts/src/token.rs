//! # Token Contract
//!
//! Rules for fungible amounts and unique tokens, applied per issued token
//! type. Amounts of different issuers never mix, so a transaction that
//! moves dollars from two banks carries two `Move` commands and each is
//! checked against its own inputs and outputs.
//!
//! | Action   | Inputs | Outputs                       | Signers                  |
//! |----------|--------|-------------------------------|--------------------------|
//! | `Issue`  | none   | at least one                  | issuer                   |
//! | `Move`   | some   | amounts balance, ids preserved| every input holder       |
//! | `Redeem` | some   | less than consumed, no unique | issuer, every input holder |

use std::collections::BTreeSet;

use accord_protocol::crypto::PublicKey;
use accord_protocol::ledger::{FungibleToken, IssuedTokenType, LinearId, UniqueToken};
use accord_protocol::transaction::{
    require_that, Command, CommandData, LedgerTransaction, TokenAction, VerificationError,
};

use crate::registry::Contract;

pub const TOKEN_CONTRACT: &str = "token";

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenContract;

/// The inputs and outputs of one issued token type.
struct TokenGroup<'a> {
    fungible_in: Vec<&'a FungibleToken>,
    fungible_out: Vec<&'a FungibleToken>,
    unique_in: Vec<&'a UniqueToken>,
    unique_out: Vec<&'a UniqueToken>,
}

impl<'a> TokenGroup<'a> {
    fn collect(tx: &'a LedgerTransaction, issued: &IssuedTokenType) -> Self {
        Self {
            fungible_in: tx.inputs_of::<FungibleToken>().into_iter().filter(|t| &t.issued == issued).collect(),
            fungible_out: tx.outputs_of::<FungibleToken>().into_iter().filter(|t| &t.issued == issued).collect(),
            unique_in: tx.inputs_of::<UniqueToken>().into_iter().filter(|t| &t.issued == issued).collect(),
            unique_out: tx.outputs_of::<UniqueToken>().into_iter().filter(|t| &t.issued == issued).collect(),
        }
    }

    fn has_inputs(&self) -> bool {
        !self.fungible_in.is_empty() || !self.unique_in.is_empty()
    }

    fn has_outputs(&self) -> bool {
        !self.fungible_out.is_empty() || !self.unique_out.is_empty()
    }

    fn input_holders(&self) -> BTreeSet<PublicKey> {
        self.fungible_in
            .iter()
            .map(|t| t.holder.owning_key)
            .chain(self.unique_in.iter().map(|t| t.holder.owning_key))
            .collect()
    }
}

fn total(tokens: &[&FungibleToken]) -> Result<u64, VerificationError> {
    let sum = tokens.iter().try_fold(0u64, |acc, t| acc.checked_add(t.amount));
    require_that(sum.is_some(), TOKEN_CONTRACT, "amounts overflow")?;
    Ok(sum.unwrap_or_default())
}

fn require_positive_amounts(tokens: &[&FungibleToken]) -> Result<(), VerificationError> {
    require_that(
        tokens.iter().all(|t| t.amount > 0),
        TOKEN_CONTRACT,
        "fungible outputs must carry a positive amount",
    )
}

fn require_signers(command: &Command, keys: &BTreeSet<PublicKey>, who: &str) -> Result<(), VerificationError> {
    require_that(
        keys.iter().all(|k| command.requires(k)),
        TOKEN_CONTRACT,
        &format!("{} must sign", who),
    )
}

fn verify_issue(group: &TokenGroup<'_>, command: &Command, issued: &IssuedTokenType) -> Result<(), VerificationError> {
    require_that(!group.has_inputs(), TOKEN_CONTRACT, "issuance consumes no tokens")?;
    require_that(group.has_outputs(), TOKEN_CONTRACT, "issuance produces tokens")?;
    require_positive_amounts(&group.fungible_out)?;
    require_that(
        command.requires(&issued.issuer.owning_key),
        TOKEN_CONTRACT,
        "the issuer must sign an issuance",
    )
}

fn verify_move(group: &TokenGroup<'_>, command: &Command) -> Result<(), VerificationError> {
    require_that(group.has_inputs(), TOKEN_CONTRACT, "a move consumes tokens")?;
    require_positive_amounts(&group.fungible_out)?;
    require_that(
        total(&group.fungible_in)? == total(&group.fungible_out)?,
        TOKEN_CONTRACT,
        "fungible amounts must balance",
    )?;

    let ids_in: BTreeSet<LinearId> = group.unique_in.iter().map(|t| t.linear_id).collect();
    let ids_out: BTreeSet<LinearId> = group.unique_out.iter().map(|t| t.linear_id).collect();
    require_that(
        ids_out.len() == group.unique_out.len() && ids_in == ids_out,
        TOKEN_CONTRACT,
        "unique tokens must keep their identity across a move",
    )?;
    require_signers(command, &group.input_holders(), "every input holder")
}

fn verify_redeem(group: &TokenGroup<'_>, command: &Command, issued: &IssuedTokenType) -> Result<(), VerificationError> {
    require_that(group.has_inputs(), TOKEN_CONTRACT, "a redemption consumes tokens")?;
    require_that(
        group.unique_out.is_empty(),
        TOKEN_CONTRACT,
        "a redemption produces no unique tokens",
    )?;
    require_positive_amounts(&group.fungible_out)?;
    let consumed = total(&group.fungible_in)?;
    let returned = total(&group.fungible_out)?;
    require_that(
        returned < consumed || (returned == consumed && !group.unique_in.is_empty()),
        TOKEN_CONTRACT,
        "a redemption must destroy something",
    )?;
    require_that(
        command.requires(&issued.issuer.owning_key),
        TOKEN_CONTRACT,
        "the issuer must sign a redemption",
    )?;
    require_signers(command, &group.input_holders(), "every input holder")
}

impl Contract for TokenContract {
    fn name(&self) -> &'static str {
        TOKEN_CONTRACT
    }

    fn claims(&self, command: &CommandData) -> bool {
        matches!(command, CommandData::Token { .. })
    }

    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        let touched: BTreeSet<&IssuedTokenType> = tx
            .inputs_of::<FungibleToken>()
            .into_iter()
            .chain(tx.outputs_of::<FungibleToken>())
            .map(|t| &t.issued)
            .chain(
                tx.inputs_of::<UniqueToken>()
                    .into_iter()
                    .chain(tx.outputs_of::<UniqueToken>())
                    .map(|t| &t.issued),
            )
            .collect();
        let commands = tx.commands_where(|c| self.claims(c));

        for issued in &touched {
            let matching = commands
                .iter()
                .filter(|c| matches!(&c.value, CommandData::Token { token, .. } if token == *issued))
                .count();
            require_that(
                matching == 1,
                TOKEN_CONTRACT,
                &format!("expected exactly one token command for {}, found {}", issued, matching),
            )?;
        }

        for command in commands {
            let CommandData::Token { action, token } = &command.value else {
                continue;
            };
            let group = TokenGroup::collect(tx, token);
            match action {
                TokenAction::Issue => verify_issue(&group, command, token)?,
                TokenAction::Move => verify_move(&group, command)?,
                TokenAction::Redeem => verify_redeem(&group, command, token)?,
            }
        }
        Ok(())
    }
}
