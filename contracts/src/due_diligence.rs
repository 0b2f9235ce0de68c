//! Rules for due-diligence requests.
//!
//! A request is prepared by its participants, then either certified by
//! its oracle (usually inside the sale it was prepared for) or dropped by
//! its participants. The certified status itself is the oracle's
//! business; the contract only checks that the certification is about
//! the right token and carries the oracle's key alone.

use std::collections::BTreeSet;

use accord_protocol::crypto::PublicKey;
use accord_protocol::ledger::DueDiligence;
use accord_protocol::transaction::{
    require_that, Command, CommandData, DiligenceCommand, LedgerTransaction, VerificationError,
};

use crate::registry::Contract;

pub const DUE_DILIGENCE_CONTRACT: &str = "due-diligence";

#[derive(Debug, Clone, Copy, Default)]
pub struct DueDiligenceContract;

fn signed_by_exactly(command: &Command, keys: BTreeSet<PublicKey>) -> bool {
    command.signers.iter().copied().collect::<BTreeSet<_>>() == keys
}

fn participant_keys(diligence: &DueDiligence) -> BTreeSet<PublicKey> {
    diligence.participants.iter().map(|p| p.owning_key).collect()
}

impl Contract for DueDiligenceContract {
    fn name(&self) -> &'static str {
        DUE_DILIGENCE_CONTRACT
    }

    fn claims(&self, command: &CommandData) -> bool {
        matches!(command, CommandData::Diligence(_))
    }

    fn verify(&self, tx: &LedgerTransaction) -> Result<(), VerificationError> {
        let inputs = tx.inputs_of::<DueDiligence>();
        let outputs = tx.outputs_of::<DueDiligence>();
        let commands = tx.commands_where(|c| self.claims(c));
        if inputs.is_empty() && outputs.is_empty() && commands.is_empty() {
            return Ok(());
        }
        require_that(
            commands.len() == 1,
            DUE_DILIGENCE_CONTRACT,
            "expected exactly one due diligence command",
        )?;
        let command = commands[0];
        let CommandData::Diligence(directive) = &command.value else {
            return Ok(());
        };

        match directive {
            DiligenceCommand::Prepare => {
                require_that(inputs.is_empty(), DUE_DILIGENCE_CONTRACT, "prepare consumes no request")?;
                require_that(outputs.len() == 1, DUE_DILIGENCE_CONTRACT, "prepare produces one request")?;
                require_that(
                    !outputs[0].participants.is_empty(),
                    DUE_DILIGENCE_CONTRACT,
                    "a request needs participants",
                )?;
                require_that(
                    signed_by_exactly(command, participant_keys(outputs[0])),
                    DUE_DILIGENCE_CONTRACT,
                    "the participants must be the only signers of prepare",
                )
            }
            DiligenceCommand::Certify { token_id, .. } => {
                require_that(inputs.len() == 1, DUE_DILIGENCE_CONTRACT, "certify consumes one request")?;
                require_that(outputs.is_empty(), DUE_DILIGENCE_CONTRACT, "certify produces no request")?;
                let request = inputs[0];
                require_that(
                    *token_id == request.token_id,
                    DUE_DILIGENCE_CONTRACT,
                    "the certified token must be the requested one",
                )?;
                require_that(
                    command.signers == [request.oracle.owning_key],
                    DUE_DILIGENCE_CONTRACT,
                    "the oracle must be the only signer of certify",
                )
            }
            DiligenceCommand::Drop => {
                require_that(inputs.len() == 1, DUE_DILIGENCE_CONTRACT, "drop consumes one request")?;
                require_that(outputs.is_empty(), DUE_DILIGENCE_CONTRACT, "drop produces no request")?;
                require_that(
                    signed_by_exactly(command, participant_keys(inputs[0])),
                    DUE_DILIGENCE_CONTRACT,
                    "the participants must be the only signers of drop",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_protocol::crypto::{KeyPair, SecureHash};
    use accord_protocol::identity::{AbstractParty, Party};
    use accord_protocol::ledger::{DiligenceStatus, LinearId, StateAndRef, StateRef, TransactionState};

    struct Fixture {
        notary: Party,
        oracle: Party,
        holder: AbstractParty,
        buyer: AbstractParty,
        request: DueDiligence,
    }

    fn fixture() -> Fixture {
        let oracle = Party::new("Oracle", KeyPair::generate().public_key());
        let holder: AbstractParty = KeyPair::generate().public_key().into();
        let buyer: AbstractParty = KeyPair::generate().public_key().into();
        Fixture {
            notary: Party::new("Notary", KeyPair::generate().public_key()),
            request: DueDiligence::new(LinearId::new(), oracle.clone(), vec![holder, buyer]),
            oracle,
            holder,
            buyer,
        }
    }

    fn consuming(f: &Fixture, command: Command) -> LedgerTransaction {
        LedgerTransaction {
            id: SecureHash::of(b"tx"),
            inputs: vec![StateAndRef::new(
                TransactionState::new(f.request.clone(), f.notary.clone()),
                StateRef::new(SecureHash::of(b"prepare"), 0),
            )],
            references: vec![],
            outputs: vec![],
            commands: vec![command],
            notary: f.notary.clone(),
            time_window: None,
        }
    }

    #[test]
    fn prepare_is_signed_by_all_participants() {
        let f = fixture();
        let mut tx = consuming(
            &f,
            Command::new(
                CommandData::Diligence(DiligenceCommand::Prepare),
                [f.holder.owning_key, f.buyer.owning_key],
            ),
        );
        tx.inputs.clear();
        tx.outputs.push(TransactionState::new(f.request.clone(), f.notary.clone()));
        assert!(DueDiligenceContract.verify(&tx).is_ok());

        tx.commands = vec![Command::new(
            CommandData::Diligence(DiligenceCommand::Prepare),
            [f.holder.owning_key],
        )];
        assert!(DueDiligenceContract.verify(&tx).is_err());
    }

    #[test]
    fn certify_names_the_token_and_the_oracle() {
        let f = fixture();
        let right = CommandData::certify(f.request.token_id, DiligenceStatus::Clear);
        assert!(DueDiligenceContract
            .verify(&consuming(&f, Command::new(right.clone(), [f.oracle.owning_key])))
            .is_ok());

        let wrong_token = CommandData::certify(LinearId::new(), DiligenceStatus::Clear);
        assert!(DueDiligenceContract
            .verify(&consuming(&f, Command::new(wrong_token, [f.oracle.owning_key])))
            .is_err());

        assert!(DueDiligenceContract
            .verify(&consuming(&f, Command::new(right, [f.oracle.owning_key, f.buyer.owning_key])))
            .is_err());
    }

    #[test]
    fn drop_needs_every_participant() {
        let f = fixture();
        let both = [f.holder.owning_key, f.buyer.owning_key];
        assert!(DueDiligenceContract
            .verify(&consuming(&f, Command::new(CommandData::Diligence(DiligenceCommand::Drop), both)))
            .is_ok());
        assert!(DueDiligenceContract
            .verify(&consuming(
                &f,
                Command::new(CommandData::Diligence(DiligenceCommand::Drop), [f.buyer.owning_key])
            ))
            .is_err());
    }
}
