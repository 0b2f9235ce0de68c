//! Token workflows across a mock network: selection, moves, redemption
//! and a double spend raced against itself.

mod common;

use accord_contracts::workflows::{
    issue_tokens, issue_unique_token, move_tokens, move_unique_state, redeem_tokens, MOVE_PROTOCOL,
};
use accord_protocol::crypto::{KeyPair, TransactionSignature};
use accord_protocol::flows::{coordinate_finalized, FlowError};
use accord_protocol::identity::{AbstractParty, Party};
use accord_protocol::ledger::{FungibleToken, StateRef, TokenType, UniqueToken};
use accord_protocol::transaction::{CommandData, SignedTransaction, TokenAction, TransactionBuilder};
use accord_protocol::vault::StatesToRecord;

use common::{balance, holder, TestNetwork};

#[tokio::test]
async fn selection_covers_a_payment_from_several_holdings() {
    let t = TestNetwork::start();
    let usd = TokenType::usd();
    issue_tokens(&t.bank, usd.clone(), &[(holder(&t.alice), 10), (holder(&t.alice), 20), (holder(&t.alice), 5)])
        .await
        .unwrap();
    assert_eq!(balance(&t.alice, &usd), 35);

    move_tokens(&t.alice, usd.clone(), Some(t.bank.party()), &[(holder(&t.bob), 35)])
        .await
        .unwrap();
    assert_eq!(balance(&t.alice, &usd), 0);
    assert_eq!(balance(&t.bob, &usd), 35);

    let err = move_tokens(&t.alice, usd.clone(), None, &[(holder(&t.bob), 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::InsufficientFunds { requested: 1, available: 0 }));
    t.shutdown();
}

#[tokio::test]
async fn change_returns_to_the_payer() {
    let t = TestNetwork::start();
    let usd = TokenType::usd();
    issue_tokens(&t.bank, usd.clone(), &[(holder(&t.alice), 100)]).await.unwrap();

    move_tokens(&t.alice, usd.clone(), None, &[(holder(&t.bob), 30), (holder(&t.carol), 45)])
        .await
        .unwrap();
    assert_eq!(balance(&t.alice, &usd), 25);
    assert_eq!(balance(&t.bob, &usd), 30);
    assert_eq!(balance(&t.carol, &usd), 45);
    t.shutdown();
}

#[tokio::test]
async fn redemption_is_cosigned_by_the_issuer() {
    let t = TestNetwork::start();
    let usd = TokenType::usd();
    issue_tokens(&t.bank, usd.clone(), &[(holder(&t.bob), 35)]).await.unwrap();

    let stx = redeem_tokens(&t.bob, usd.clone(), t.bank.party(), 15).await.unwrap();
    assert!(stx.signing_keys().contains(&t.bank.party().owning_key));
    assert_eq!(balance(&t.bob, &usd), 20);
    t.shutdown();
}

#[tokio::test]
async fn racing_moves_of_one_token_commit_once() {
    let t = TestNetwork::start();
    let issued = issue_unique_token(&t.dmv, TokenType::fixed("BAR-7", 0), holder(&t.alice))
        .await
        .unwrap();
    let token_id = issued.tx().outputs[0].get::<UniqueToken>().unwrap().linear_id;
    let current = t.alice.vault().unconsumed_linear(token_id).unwrap().unwrap();

    let (to_bob, to_carol) = tokio::join!(
        move_unique_state(&t.alice, current.clone(), holder(&t.bob)),
        move_unique_state(&t.alice, current, holder(&t.carol)),
    );
    let outcomes = [to_bob, to_carol];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(FlowError::DoubleSpendOrConflict(_)))));

    let bob_has = t.bob.vault().unconsumed_linear(token_id).unwrap().is_some();
    let carol_has = t.carol.vault().unconsumed_linear(token_id).unwrap().is_some();
    assert!(bob_has ^ carol_has);
    t.shutdown();
}

#[tokio::test]
async fn tokens_from_a_forged_issuance_are_refused_by_the_recipient() {
    let t = TestNetwork::start();
    let usd = t.usd();
    let carol_key = t.carol.party().owning_key;

    // An issuance Carol signs herself, under a notary key nobody else knows.
    let fake_notary = KeyPair::generate();
    let mut forged = TransactionBuilder::new(t.net.notary_party().clone())
        .add_output_state(FungibleToken::new(usd.clone(), holder(&t.carol), 1_000_000))
        .add_command(CommandData::token(TokenAction::Issue, usd.clone()), [carol_key])
        .to_wire_transaction();
    forged.notary = Some(Party::new(t.net.notary_party().name.clone(), fake_notary.public_key()));
    let forged_id = forged.id();
    let sigs = vec![
        t.carol.keys().sign(&carol_key, &forged_id).unwrap(),
        TransactionSignature::sign(&fake_notary, &forged_id),
    ];
    let forged = SignedTransaction::new(forged, sigs);
    forged.verify_required_signatures().unwrap();
    t.carol
        .vault()
        .record_transactions(StatesToRecord::OnlyRelevant, &[forged])
        .unwrap();
    assert_eq!(balance(&t.carol, &TokenType::usd()), 1_000_000);

    let input = t.carol.vault().state(&StateRef::new(forged_id, 0)).unwrap().unwrap();
    let spend = TransactionBuilder::new(t.net.notary_party().clone())
        .add_input_state(input)
        .add_output_state(FungibleToken::new(usd.clone(), holder(&t.bob), 1_000_000))
        .add_command(CommandData::token(TokenAction::Move, usd), [carol_key])
        .sign_initial(t.carol.keys(), &[carol_key])
        .unwrap();

    let finalized = coordinate_finalized(&t.carol, MOVE_PROTOCOL, spend, &[]).await.unwrap();
    assert_eq!(finalized.unacknowledged, vec![t.bob.party().clone()]);
    assert!(!t.bob.vault().has_transaction(&finalized.transaction.id()).unwrap());
    assert!(!t.bob.vault().has_transaction(&forged_id).unwrap());
    assert_eq!(balance(&t.bob, &TokenType::usd()), 0);
    t.shutdown();
}

#[tokio::test]
async fn recipients_receive_and_check_the_whole_back_chain() {
    let t = TestNetwork::start();
    let usd = TokenType::usd();
    let issued = issue_tokens(&t.bank, usd.clone(), &[(holder(&t.alice), 50)]).await.unwrap();
    let first = move_tokens(&t.alice, usd.clone(), None, &[(holder(&t.bob), 50)])
        .await
        .unwrap();

    let second = move_tokens(&t.bob, usd.clone(), None, &[(holder(&t.carol), 50)])
        .await
        .unwrap();

    assert_eq!(balance(&t.carol, &usd), 50);
    for id in [issued.id(), first.id(), second.id()] {
        assert!(t.carol.vault().has_transaction(&id).unwrap());
    }
    t.shutdown();
}

#[tokio::test]
async fn holdings_under_a_fresh_key_are_spent() {
    let t = TestNetwork::start();
    let usd = TokenType::usd();
    let fresh = t.alice.keys().fresh_key();
    t.bank.identity().register_key(fresh, t.alice.party().clone());
    issue_tokens(&t.bank, usd.clone(), &[(AbstractParty::new(fresh), 40), (holder(&t.alice), 10)])
        .await
        .unwrap();
    assert_eq!(balance(&t.alice, &usd), 50);

    move_tokens(&t.alice, usd.clone(), None, &[(holder(&t.bob), 45)])
        .await
        .unwrap();
    assert_eq!(balance(&t.alice, &usd), 5);
    assert_eq!(balance(&t.bob, &usd), 45);

    redeem_tokens(&t.alice, usd.clone(), t.bank.party(), 5).await.unwrap();
    assert_eq!(balance(&t.alice, &usd), 0);
    t.shutdown();
}
