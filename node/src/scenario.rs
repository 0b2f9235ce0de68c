//! # Demo Scenarios
//!
//! Each scenario starts a fresh in-process network, installs the
//! application on every participant and drives the workflows the way
//! real users would. Every step lands in a [`Report`] that `main` prints.
//!
//! ```text
//!   Bank ── issues USD ──▶ Alice, Bob
//!   Dmv  ── describes cars, issues car tokens ──▶ Alice
//!   Alice ── offers a car ──▶ Bob ── accepts (optionally with diligence)
//!   Oracle ── certifies diligence over a partial view of the accept
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use accord_contracts::workflows::{
    accept_sale, create_asset_type, issue_tokens, issue_unique_token, move_tokens, offer_sale, prepare_diligence,
    query_diligence, redeem_tokens, update_asset_type, DiligenceClaim,
};
use accord_contracts::{install, verifier, AppServices};
use accord_protocol::attestation::{self, AttestationService};
use accord_protocol::clock::Clock;
use accord_protocol::config::NodeConfig;
use accord_protocol::identity::AbstractParty;
use accord_protocol::ledger::{
    AssetType, DiligenceStatus, DueDiligence, FungibleToken, IssuedAmount, IssuedTokenType, LinearId,
    SalesProposal, StateType, TokenType, UniqueToken,
};
use accord_protocol::network::{MockNetwork, Node};
use accord_protocol::vault::QueryCriteria;

use crate::cli::Scenario;

/// How long to wait for asynchronous effects (tracker forwarding,
/// scheduled expiries) before giving up.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub scenario: &'static str,
    pub action: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub steps: Vec<Step>,
}

impl Report {
    fn record(&mut self, scenario: &'static str, action: impl Into<String>, outcome: impl Display, tx_id: Option<String>) {
        let step = Step {
            scenario,
            action: action.into(),
            outcome: outcome.to_string(),
            tx_id,
        };
        info!(scenario, action = %step.action, outcome = %step.outcome, "demo step");
        self.steps.push(step);
    }

    pub fn print_table(&self) {
        println!("{:<8} {:<44} {:<36} {}", "SCENARIO", "ACTION", "OUTCOME", "TX");
        for step in &self.steps {
            println!(
                "{:<8} {:<44} {:<36} {}",
                step.scenario,
                step.action,
                step.outcome,
                step.tx_id.as_deref().unwrap_or("-")
            );
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize report")
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The cast of every scenario.
struct Demo {
    net: MockNetwork,
    bank: Arc<Node>,
    dmv: Arc<Node>,
    alice: Arc<Node>,
    bob: Arc<Node>,
    oracle: Arc<Node>,
    attester: Arc<AttestationService>,
    services: Vec<AppServices>,
}

impl Demo {
    fn start(config: &NodeConfig) -> Result<Self> {
        let net = MockNetwork::with_config(verifier(), config.clone());
        let node = |name: &str| net.create_node(name).with_context(|| format!("failed to start node {name}"));
        let (bank, dmv, alice, bob, oracle) = (node("Bank")?, node("Dmv")?, node("Alice")?, node("Bob")?, node("Oracle")?);
        let services = [&bank, &dmv, &alice, &bob, &oracle]
            .into_iter()
            .map(|n| install(n).with_context(|| format!("failed to install workflows on {}", n.party())))
            .collect::<Result<Vec<_>>>()?;
        let attester = attestation::install(&oracle);
        Ok(Self {
            net,
            bank,
            dmv,
            alice,
            bob,
            oracle,
            attester,
            services,
        })
    }

    fn usd(&self) -> IssuedTokenType {
        IssuedTokenType::new(self.bank.party().clone(), TokenType::usd())
    }

    fn now(&self) -> DateTime<Utc> {
        self.net.clock().now()
    }

    /// Describe a car, give Alice its token and return both ids.
    async fn register_car(&self, vin: &str, make: &str) -> Result<(LinearId, LinearId)> {
        let described = create_asset_type(&self.dmv, vin, make, 42_000, 9_000, &[self.alice.party().clone()])
            .await
            .context("dmv failed to describe the car")?;
        let asset_type = described
            .get::<AssetType>()
            .map(|a| a.linear_id)
            .context("asset description missing from output")?;
        let issued = issue_unique_token(&self.dmv, TokenType::pointer(asset_type), holder(&self.alice))
            .await
            .context("dmv failed to issue the car token")?;
        let car = issued
            .tx()
            .outputs
            .iter()
            .find_map(|o| o.get::<UniqueToken>())
            .map(|t| t.linear_id)
            .context("car token missing from output")?;
        Ok((asset_type, car))
    }

    async fn offer(&self, car: LinearId, price: u64, expiration: DateTime<Utc>) -> Result<LinearId> {
        let proposal = offer_sale(&self.alice, car, holder(&self.bob), IssuedAmount::new(price, self.usd()), expiration)
            .await
            .context("alice failed to offer the car")?;
        proposal
            .get::<SalesProposal>()
            .map(|p| p.linear_id)
            .context("proposal missing from output")
    }

    fn shutdown(&self) {
        for services in &self.services {
            services.stop();
        }
        self.net.stop_nodes();
    }
}

fn holder(node: &Node) -> AbstractParty {
    node.party().anonymise()
}

fn balance(node: &Node, token_type: &TokenType) -> Result<u64> {
    let criteria = QueryCriteria::unconsumed()
        .of_type(StateType::Fungible)
        .token_type(token_type.clone());
    Ok(node
        .vault()
        .query_all(&criteria)?
        .iter()
        .filter_map(|s| s.get::<FungibleToken>())
        .filter(|t| node.keys().is_mine(&t.holder.owning_key))
        .map(|t| t.amount)
        .sum())
}

fn holds(node: &Node, token_id: LinearId) -> Result<bool> {
    Ok(node
        .vault()
        .unconsumed_linear(token_id)?
        .and_then(|s| s.get::<UniqueToken>().cloned())
        .is_some_and(|t| node.keys().is_mine(&t.holder.owning_key)))
}

async fn settle(mut condition: impl FnMut() -> Result<bool>) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition()? {
            return Ok(true);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

pub async fn run(scenario: Scenario, config: &NodeConfig, expiry: Duration) -> Result<Report> {
    let mut report = Report::default();
    if matches!(scenario, Scenario::Tokens | Scenario::All) {
        let demo = Demo::start(config)?;
        let outcome = tokens(&demo, &mut report).await;
        demo.shutdown();
        outcome?;
    }
    if matches!(scenario, Scenario::Sale | Scenario::All) {
        let demo = Demo::start(config)?;
        let outcome = sale(&demo, &mut report).await;
        demo.shutdown();
        outcome?;
    }
    if matches!(scenario, Scenario::Expiry | Scenario::All) {
        if !config.scheduler_enabled {
            bail!("the expiry scenario needs scheduler_enabled = true");
        }
        let demo = Demo::start(config)?;
        let outcome = expiry_scenario(&demo, &mut report, expiry).await;
        demo.shutdown();
        outcome?;
    }
    Ok(report)
}

/// Issue, pay with change, redeem.
async fn tokens(demo: &Demo, report: &mut Report) -> Result<()> {
    const NAME: &str = "tokens";
    let usd = TokenType::usd();

    for amount in [60, 40] {
        let stx = issue_tokens(&demo.bank, usd.clone(), &[(holder(&demo.alice), amount)]).await?;
        report.record(NAME, format!("Bank issues {amount} USD to Alice"), "notarised", Some(stx.id().short()));
    }

    let stx = move_tokens(&demo.alice, usd.clone(), None, &[(holder(&demo.bob), 70)]).await?;
    report.record(
        NAME,
        "Alice pays Bob 70 USD",
        format!("alice={} bob={}", balance(&demo.alice, &usd)?, balance(&demo.bob, &usd)?),
        Some(stx.id().short()),
    );

    let stx = redeem_tokens(&demo.bob, usd.clone(), demo.bank.party(), 20).await?;
    report.record(
        NAME,
        "Bob redeems 20 USD with the Bank",
        format!("bob={}", balance(&demo.bob, &usd)?),
        Some(stx.id().short()),
    );

    match move_tokens(&demo.alice, usd.clone(), None, &[(holder(&demo.bob), 1_000)]).await {
        Ok(stx) => bail!("overspend unexpectedly succeeded in {}", stx.id().short()),
        Err(e) => report.record(NAME, "Alice tries to pay 1000 USD", format!("refused: {e}"), None),
    }
    Ok(())
}

/// Describe, offer, follow an update, accept with due diligence.
async fn sale(demo: &Demo, report: &mut Report) -> Result<()> {
    const NAME: &str = "sale";
    let usd = TokenType::usd();

    let (asset_type, car) = demo.register_car("1HGCM82633A004352", "Honda").await?;
    report.record(NAME, "Dmv describes a car, Alice receives it", "notarised", None);

    let stx = issue_tokens(&demo.bank, usd.clone(), &[(holder(&demo.bob), 10_000)]).await?;
    report.record(NAME, "Bank issues 10000 USD to Bob", "notarised", Some(stx.id().short()));

    let proposal_id = demo.offer(car, 8_000, demo.now() + ChronoDuration::minutes(10)).await?;
    report.record(NAME, "Alice offers the car to Bob for 8000", format!("proposal {proposal_id}"), None);

    update_asset_type(&demo.dmv, asset_type, |a| a.mileage = 42_500, &[demo.alice.party().clone()])
        .await
        .context("dmv failed to update the description")?;
    let bob = Arc::clone(&demo.bob);
    let followed = settle(|| {
        Ok(bob
            .vault()
            .unconsumed_linear(asset_type)?
            .and_then(|s| s.get::<AssetType>().map(|a| a.mileage))
            == Some(42_500))
    })
    .await?;
    report.record(
        NAME,
        "Dmv updates the mileage",
        if followed { "buyer sees the update" } else { "buyer missed the update" },
        None,
    );

    demo.attester.set_status(car, DiligenceStatus::Clear);
    let status = query_diligence(&demo.bob, demo.oracle.party(), car).await?;
    report.record(NAME, "Bob asks the Oracle about the car", status, None);

    let request = prepare_diligence(&demo.bob, car, demo.oracle.party(), &[holder(&demo.alice)]).await?;
    let request_id = request
        .get::<DueDiligence>()
        .map(|d| d.linear_id)
        .context("diligence request missing from output")?;
    report.record(NAME, "Bob prepares due diligence with Alice", format!("request {request_id}"), None);

    let stx = accept_sale(&demo.bob, proposal_id, Some(DiligenceClaim::new(request_id, status))).await?;
    let attested = stx.signing_keys().contains(&demo.oracle.party().owning_key);
    report.record(
        NAME,
        "Bob accepts with certified diligence",
        format!(
            "attested={} bob_has_car={} alice={} bob={}",
            attested,
            holds(&demo.bob, car)?,
            balance(&demo.alice, &usd)?,
            balance(&demo.bob, &usd)?
        ),
        Some(stx.id().short()),
    );
    Ok(())
}

/// Let an offer lapse and watch the seller's scheduler cancel it.
async fn expiry_scenario(demo: &Demo, report: &mut Report, expiry: Duration) -> Result<()> {
    const NAME: &str = "expiry";
    let (_, car) = demo.register_car("JH4KA7560MC012345", "Acura").await?;
    issue_tokens(&demo.bank, TokenType::usd(), &[(holder(&demo.bob), 5_000)]).await?;

    let lifetime = ChronoDuration::from_std(expiry).context("expiry out of range")?;
    let proposal_id = demo.offer(car, 4_000, demo.now() + lifetime).await?;
    report.record(NAME, format!("Alice offers a car, expiring in {}s", expiry.as_secs()), "notarised", None);

    tokio::time::sleep(expiry).await;
    let alice = Arc::clone(&demo.alice);
    let bob = Arc::clone(&demo.bob);
    let cancelled = settle(|| {
        Ok(alice.vault().unconsumed_linear(proposal_id)?.is_none() && bob.vault().unconsumed_linear(proposal_id)?.is_none())
    })
    .await?;
    if !cancelled {
        warn!(proposal = %proposal_id, "proposal still open after expiry");
    }
    report.record(
        NAME,
        "Seller's scheduler cancels the lapsed offer",
        if cancelled { "cancelled" } else { "still open" },
        None,
    );

    match accept_sale(&demo.bob, proposal_id, None).await {
        Ok(stx) => bail!("accept after expiry unexpectedly succeeded in {}", stx.id().short()),
        Err(e) => report.record(NAME, "Bob tries to accept late", format!("refused: {e}"), None),
    }
    report.record(NAME, "Alice still holds the car", holds(&demo.alice, car)?, None);
    Ok(())
}
