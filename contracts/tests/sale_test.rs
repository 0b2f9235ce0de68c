//! Sale workflows: offers, accepts with and without due diligence,
//! rejections, automatic expiry and the asset description tracker.

mod common;

use chrono::Duration as ChronoDuration;
use std::time::Duration;

use accord_contracts::workflows::{
    accept_proposal, accept_sale, create_asset_type, issue_tokens, issue_unique_token, offer_sale,
    prepare_diligence, query_diligence, reject_sale, update_asset_type, DiligenceClaim,
};
use accord_protocol::attestation::submit_view;
use accord_protocol::clock::Clock;
use accord_protocol::flows::FlowError;
use accord_protocol::ledger::{
    AssetType, DiligenceStatus, DueDiligence, IssuedAmount, LinearId, SalesProposal, StateAndRef, TokenType,
    UniqueToken,
};
use accord_protocol::transaction::{CommandData, FilteredElement, TimeWindow, TransactionBuilder};

use common::{assert_recorded_consistently, balance, eventually, holder, TestNetwork};

struct Listing {
    asset_type: LinearId,
    car: LinearId,
    proposal: StateAndRef,
}

impl Listing {
    fn proposal_id(&self) -> LinearId {
        self.proposal.get::<SalesProposal>().unwrap().linear_id
    }
}

/// The DMV describes a car and gives Alice a token for it, the bank funds
/// Bob, and Alice offers the car to Bob for 8 000 until `expires_in`.
async fn list_car(t: &TestNetwork, expires_in: ChronoDuration) -> Listing {
    let described = create_asset_type(&t.dmv, "1HGCM82633A004352", "Honda", 0, 9_000, &[t.alice.party().clone()])
        .await
        .unwrap();
    let asset_type = described.get::<AssetType>().unwrap().linear_id;
    let issued = issue_unique_token(&t.dmv, TokenType::pointer(asset_type), holder(&t.alice))
        .await
        .unwrap();
    let car = issued.tx().outputs[0].get::<UniqueToken>().unwrap().linear_id;
    issue_tokens(&t.bank, TokenType::usd(), &[(holder(&t.bob), 10_000)]).await.unwrap();

    let expiration = t.net.clock().now() + expires_in;
    let proposal = offer_sale(&t.alice, car, holder(&t.bob), IssuedAmount::new(8_000, t.usd()), expiration)
        .await
        .unwrap();
    Listing {
        asset_type,
        car,
        proposal,
    }
}

fn holds(node: &accord_protocol::network::Node, token_id: LinearId) -> bool {
    node.vault()
        .unconsumed_linear(token_id)
        .unwrap()
        .and_then(|s| s.get::<UniqueToken>().cloned())
        .is_some_and(|t| node.keys().is_mine(&t.holder.owning_key))
}

#[tokio::test]
async fn buyer_accepts_and_pays() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;

    // The buyer was told about the proposal and the car's description.
    assert!(t.bob.vault().unconsumed_linear(listing.proposal_id()).unwrap().is_some());
    assert!(t.bob.vault().unconsumed_linear(listing.asset_type).unwrap().is_some());

    let sale = accept_sale(&t.bob, listing.proposal_id(), None).await.unwrap();

    let usd = TokenType::usd();
    assert!(holds(&t.bob, listing.car));
    assert!(!holds(&t.alice, listing.car));
    assert_eq!(balance(&t.alice, &usd), 8_000);
    assert_eq!(balance(&t.bob, &usd), 2_000);
    assert!(t.alice.vault().unconsumed_linear(listing.proposal_id()).unwrap().is_none());
    assert_recorded_consistently(&[&t.alice, &t.bob], &sale);
    t.shutdown();
}

#[tokio::test]
async fn accept_with_due_diligence_is_attested() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;
    t.attester.set_status(listing.car, DiligenceStatus::Clear);
    assert_eq!(
        query_diligence(&t.bob, t.oracle.party(), listing.car).await.unwrap(),
        DiligenceStatus::Clear
    );

    let request = prepare_diligence(&t.bob, listing.car, t.oracle.party(), &[holder(&t.alice)])
        .await
        .unwrap();
    let request_id = request.get::<DueDiligence>().unwrap().linear_id;
    assert!(t.alice.vault().unconsumed_linear(request_id).unwrap().is_some());

    let stx = accept_sale(
        &t.bob,
        listing.proposal_id(),
        Some(DiligenceClaim::new(request_id, DiligenceStatus::Clear)),
    )
    .await
    .unwrap();
    assert!(stx.signing_keys().contains(&t.oracle.party().owning_key));
    assert!(holds(&t.bob, listing.car));
    assert!(t.alice.vault().unconsumed_linear(request_id).unwrap().is_none());
    assert_recorded_consistently(&[&t.alice, &t.bob], &stx);
    t.shutdown();
}

#[tokio::test]
async fn attester_refuses_a_wrong_status() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;
    t.attester.set_status(listing.car, DiligenceStatus::Linked);
    let request = prepare_diligence(&t.bob, listing.car, t.oracle.party(), &[holder(&t.alice)])
        .await
        .unwrap();
    let request_id = request.get::<DueDiligence>().unwrap().linear_id;

    let err = accept_sale(
        &t.bob,
        listing.proposal_id(),
        Some(DiligenceClaim::new(request_id, DiligenceStatus::Clear)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlowError::ValidationFailure(_)), "{err}");
    assert!(holds(&t.alice, listing.car));
    t.shutdown();
}

#[tokio::test]
async fn hidden_certification_is_refused() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;
    t.attester.set_status(listing.car, DiligenceStatus::Clear);
    let request = prepare_diligence(&t.bob, listing.car, t.oracle.party(), &[holder(&t.alice)])
        .await
        .unwrap();

    let oracle_key = t.oracle.party().owning_key;
    let shown = CommandData::certify(listing.car, DiligenceStatus::Clear);
    let hidden = CommandData::certify(listing.car, DiligenceStatus::Linked);
    let until = t.net.clock().now() + ChronoDuration::minutes(1);
    let stx = TransactionBuilder::new(t.net.notary_party().clone())
        .add_input_state(request)
        .add_command(shown.clone(), [oracle_key])
        .add_command(hidden, [oracle_key])
        .set_time_window(TimeWindow::until_only(until))
        .sign_initial(t.bob.keys(), &[])
        .unwrap();
    let view = stx.tx().build_filtered_transaction(|e| match e {
        FilteredElement::Command(c) => c.value == shown,
        FilteredElement::TimeWindow(_) => true,
        _ => false,
    });

    let err = submit_view(&t.bob, t.oracle.party(), &stx, view).await.unwrap_err();
    assert!(matches!(err, FlowError::DisclosureViolation(_)), "{err}");
    t.shutdown();
}

#[tokio::test]
async fn buyer_may_reject_at_any_time() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;

    let rejection = reject_sale(&t.bob, listing.proposal_id()).await.unwrap();
    assert!(t.alice.vault().unconsumed_linear(listing.proposal_id()).unwrap().is_none());
    assert!(t.bob.vault().unconsumed_linear(listing.proposal_id()).unwrap().is_none());
    assert!(holds(&t.alice, listing.car));
    assert_recorded_consistently(&[&t.alice, &t.bob], &rejection);
    t.shutdown();
}

#[tokio::test]
async fn seller_cannot_reject_before_expiry() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;

    let err = reject_sale(&t.alice, listing.proposal_id()).await.unwrap_err();
    assert!(matches!(err, FlowError::ValidationFailure(_)), "{err}");
    assert!(t.alice.vault().unconsumed_linear(listing.proposal_id()).unwrap().is_some());
    t.shutdown();
}

#[tokio::test(start_paused = true)]
async fn expired_proposal_is_cancelled_by_the_seller() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::seconds(10)).await;
    let stale = t.bob.vault().unconsumed_linear(listing.proposal_id()).unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(t.alice.vault().unconsumed_linear(listing.proposal_id()).unwrap().is_none());

    let err = accept_sale(&t.bob, listing.proposal_id(), None).await.unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)), "{err}");

    let err = accept_proposal(&t.bob, stale, None).await.unwrap_err();
    assert!(matches!(err, FlowError::DoubleSpendOrConflict(_)), "{err}");
    assert!(holds(&t.alice, listing.car));
    t.shutdown();
}

#[tokio::test]
async fn buyer_follows_asset_description_updates() {
    let t = TestNetwork::start();
    let listing = list_car(&t, ChronoDuration::minutes(10)).await;

    update_asset_type(&t.dmv, listing.asset_type, |a| a.mileage = 12_000, &[t.alice.party().clone()])
        .await
        .unwrap();

    let bob = t.bob.clone();
    let asset_type = listing.asset_type;
    let updated = eventually(|| {
        bob.vault()
            .unconsumed_linear(asset_type)
            .unwrap()
            .and_then(|s| s.get::<AssetType>().map(|a| a.mileage))
            == Some(12_000)
    })
    .await;
    assert!(updated);
    t.shutdown();
}
