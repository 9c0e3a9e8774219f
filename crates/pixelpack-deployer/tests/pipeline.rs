//! End-to-end pipeline runs against the simulated chain.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{address, U256};
use tokio::sync::mpsc::UnboundedReceiver;

use pixelpack_deployer::chain::simulated::initial_link_supply;
use pixelpack_deployer::contracts;
use pixelpack_deployer::error::{ChainError, ConfigError, PipelineError};
use pixelpack_deployer::steps::{CREATE_PIXEL_PACK, DEPLOY_MOCKS, FUND_WITH_LINK};
use pixelpack_deployer::{
    default_registry, ArtifactStore, DeployerConfig, EventEmitter, NetworkContext, NetworkTable,
    PipelineExecutor, ProgressEvent, RunMode, SimulatedChain, StepRegistry, Transactor,
};

const ONE_LINK: u64 = 1_000_000_000_000_000_000;
const FEE: u64 = 100_000_000_000_000_000;

struct Harness {
    chain: SimulatedChain,
    store: Arc<ArtifactStore>,
    registry: StepRegistry,
    executor: PipelineExecutor,
    events: UnboundedReceiver<ProgressEvent>,
}

fn harness_with(
    chain: SimulatedChain,
    store: Arc<ArtifactStore>,
    config: DeployerConfig,
) -> Harness {
    let transactor = Transactor::new(
        Arc::new(chain.clone()),
        chain.deployer(),
        config.confirmations,
        config.confirmation_timeout(),
    );
    let (emitter, events) = EventEmitter::channel();
    let executor =
        PipelineExecutor::new(NetworkTable::builtin(), store.clone(), transactor, emitter);
    Harness {
        chain,
        store,
        registry: default_registry(&config).unwrap(),
        executor,
        events,
    }
}

fn harness() -> Harness {
    harness_with(
        SimulatedChain::new(),
        Arc::new(ArtifactStore::in_memory()),
        DeployerConfig::default(),
    )
}

fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<&'static str> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event.event_type());
    }
    seen
}

#[tokio::test]
async fn test_local_full_run() {
    let mut h = harness();
    let network = NetworkTable::builtin().context_for("hardhat").unwrap();
    let steps = h.registry.select(&[RunMode::All]);

    let summary = tokio_test::assert_ok!(h.executor.run(&steps, &network).await);

    let names: Vec<&str> = summary.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, h.registry.names());
    let produced: Vec<&str> = summary.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        produced,
        vec![contracts::LINK_TOKEN, contracts::VRF_COORDINATOR_MOCK, contracts::PIXEL_PACK_FACTORY]
    );

    let mint = summary.step(CREATE_PIXEL_PACK).unwrap().detail.clone().unwrap();
    assert_eq!(mint["request"]["status"], "fulfilled");
    assert!(!mint["token_uri"].as_str().unwrap().is_empty());

    // Factory received the fund amount and paid one request fee.
    let link = h.store.get(&network.id, contracts::LINK_TOKEN).await.unwrap().address;
    let factory = h.store.get(&network.id, contracts::PIXEL_PACK_FACTORY).await.unwrap().address;
    assert_eq!(
        h.chain.balance_of(link, factory).await,
        U256::from(ONE_LINK) - U256::from(FEE)
    );

    let events = drain(&mut h.events);
    for expected in [
        "stepStarted",
        "fundingSent",
        "requestIssued",
        "requestFulfilled",
        "stepCompleted",
    ] {
        assert!(events.contains(&expected), "missing {expected} in {events:?}");
    }
    assert!(!events.contains(&"stepFailed"));
}

#[tokio::test]
async fn test_rerun_reuses_every_artifact() {
    let h = harness();
    let network = NetworkContext::local();
    let steps = h.registry.select(&[RunMode::All]);

    h.executor.run(&steps, &network).await.unwrap();
    assert_eq!(h.chain.deploy_count().await, 3);

    let second = h.executor.run(&steps, &network).await.unwrap();
    assert_eq!(h.chain.deploy_count().await, 3);
    assert!(second.artifacts.is_empty());
    assert_eq!(
        second.step(DEPLOY_MOCKS).unwrap().reused,
        vec![contracts::LINK_TOKEN.to_string(), contracts::VRF_COORDINATOR_MOCK.to_string()]
    );
    // The second mint gets the next token id.
    let mint = second.step(CREATE_PIXEL_PACK).unwrap().detail.clone().unwrap();
    assert_eq!(mint["request"]["token_id"], serde_json::json!("0x1"));
}

#[tokio::test]
async fn test_fund_only_without_factory_submits_nothing() {
    let mut h = harness();
    let steps = h.registry.select(&[RunMode::FundOnly]);

    let failure = h.executor.run(&steps, &NetworkContext::local()).await.unwrap_err();

    assert_eq!(failure.step, FUND_WITH_LINK);
    assert!(matches!(
        &failure.error,
        PipelineError::UnsatisfiedDependency { missing, .. }
            if missing == &vec![contracts::PIXEL_PACK_FACTORY.to_string()]
    ));
    assert!(h.chain.transactions().await.is_empty());
    assert!(drain(&mut h.events).contains(&"stepFailed"));
}

#[tokio::test]
async fn test_factory_without_mocks_is_configuration_error() {
    let h = harness();
    let steps = h.registry.select(&[RunMode::PxpOnly]);

    let failure = h.executor.run(&steps, &NetworkContext::local()).await.unwrap_err();

    assert_eq!(failure.kind(), "configuration");
    assert!(matches!(
        failure.error,
        PipelineError::Config(ConfigError::MissingArtifact { .. })
    ));
    assert!(h.chain.transactions().await.is_empty());
}

#[tokio::test]
async fn test_mocks_then_fund_only_stops_at_funding() {
    let mut h = harness();
    let network = NetworkContext::local();
    let steps = h.registry.select(&[RunMode::Mocks, RunMode::FundOnly]);

    let failure = h.executor.run(&steps, &network).await.unwrap_err();

    assert_eq!(failure.step, FUND_WITH_LINK);
    assert_eq!(failure.kind(), "unsatisfied_dependency");
    let produced: Vec<&str> = failure.summary.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(produced, vec![contracts::LINK_TOKEN, contracts::VRF_COORDINATOR_MOCK]);
    assert_eq!(h.store.list(&network.id).await.len(), 2);
    // Only the two mock deployments reached the chain.
    assert_eq!(h.chain.transactions().await.len(), 2);
    assert!(drain(&mut h.events).contains(&"stepFailed"));
}

#[tokio::test]
async fn test_resume_on_same_chain_reuses_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifacts.json");
    let chain = SimulatedChain::new();
    let network = NetworkContext::local();

    {
        let store = Arc::new(ArtifactStore::open(&path).await.unwrap());
        let h = harness_with(chain.clone(), store, DeployerConfig::default());
        let steps = h.registry.select(&[RunMode::Mocks, RunMode::MockPxp]);
        h.executor.run(&steps, &network).await.unwrap();
    }
    assert_eq!(chain.deploy_count().await, 3);

    let store = Arc::new(ArtifactStore::open(&path).await.unwrap());
    assert_eq!(store.list(&network.id).await.len(), 3);
    let h = harness_with(chain.clone(), store, DeployerConfig::default());
    let steps = h.registry.select(&[RunMode::FundOnly, RunMode::CreateOnly]);

    let summary = h.executor.run(&steps, &network).await.unwrap();
    assert_eq!(summary.steps.len(), 2);
    assert_eq!(chain.deploy_count().await, 3);
}

#[tokio::test]
async fn test_resume_after_restart_redeploys_missing_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifacts.json");
    let network = NetworkContext::local();

    {
        let store = Arc::new(ArtifactStore::open(&path).await.unwrap());
        let h = harness_with(SimulatedChain::new(), store, DeployerConfig::default());
        let steps = h.registry.select(&[RunMode::All]);
        h.executor.run(&steps, &network).await.unwrap();
    }

    // A restarted process talks to a fresh chain that has none of the stored contracts.
    let restarted = SimulatedChain::new();
    let store = Arc::new(ArtifactStore::open(&path).await.unwrap());
    assert_eq!(store.list(&network.id).await.len(), 3);
    let h = harness_with(restarted.clone(), store, DeployerConfig::default());
    let steps = h.registry.select(&[RunMode::All]);

    let summary = tokio_test::assert_ok!(h.executor.run(&steps, &network).await);

    assert_eq!(restarted.deploy_count().await, 3);
    assert!(summary.step(DEPLOY_MOCKS).unwrap().reused.is_empty());
    assert_eq!(summary.artifacts.len(), 3);
    let mint = summary.step(CREATE_PIXEL_PACK).unwrap().detail.clone().unwrap();
    assert_eq!(mint["request"]["status"], "fulfilled");

    let link = h.store.get(&network.id, contracts::LINK_TOKEN).await.unwrap().address;
    let factory = h.store.get(&network.id, contracts::PIXEL_PACK_FACTORY).await.unwrap().address;
    assert_eq!(
        restarted.balance_of(link, factory).await,
        U256::from(ONE_LINK) - U256::from(FEE)
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_run_with_two_confirmations() {
    let config = DeployerConfig {
        confirmations: 2,
        confirmation_timeout_secs: 30,
        ..DeployerConfig::default()
    };
    let h = harness_with(SimulatedChain::new(), Arc::new(ArtifactStore::in_memory()), config);
    let steps = h.registry.select(&[RunMode::All]);

    let summary = tokio_test::assert_ok!(h.executor.run(&steps, &NetworkContext::local()).await);

    assert_eq!(summary.steps.len(), 4);
    // Every transaction got one extra empty block on top.
    let submitted = h.chain.transactions().await.len() as u64;
    assert_eq!(h.chain.head().await, submitted * 2);
}

#[tokio::test]
async fn test_skip_funded_targets_on_rerun() {
    let config = DeployerConfig {
        skip_funded_targets: true,
        ..DeployerConfig::default()
    };
    let h = harness_with(SimulatedChain::new(), Arc::new(ArtifactStore::in_memory()), config);
    let network = NetworkContext::local();
    let steps = h.registry.select(&[RunMode::Mocks, RunMode::FundLink]);

    h.executor.run(&steps, &network).await.unwrap();
    let second = h.executor.run(&steps, &network).await.unwrap();

    let funding = second.step(FUND_WITH_LINK).unwrap().detail.clone().unwrap();
    assert_eq!(funding["status"], "skipped");
    let link = h.store.get(&network.id, contracts::LINK_TOKEN).await.unwrap().address;
    let factory = h.store.get(&network.id, contracts::PIXEL_PACK_FACTORY).await.unwrap().address;
    assert_eq!(h.chain.balance_of(link, factory).await, U256::from(ONE_LINK));
}

#[tokio::test(start_paused = true)]
async fn test_live_network_with_external_oracle() {
    let link = address!("01BE23585060835E02B77ef475b0Cc51aA1e0709");
    let coordinator = address!("b3dCcb4Cf7a26f6cf6B120Cf5A73875B7BBc655B");
    let chain = SimulatedChain::new();
    chain.install_link_token(link, chain.deployer(), initial_link_supply()).await;
    chain.install_coordinator(coordinator).await;
    chain.set_auto_fulfill(Some(Duration::from_secs(45))).await;

    let mut h = harness_with(
        chain,
        Arc::new(ArtifactStore::in_memory()),
        DeployerConfig::default(),
    );
    let network = NetworkTable::builtin().context_for("rinkeby").unwrap();
    assert!(!network.is_local);
    let steps = h.registry.select(&[RunMode::All]);

    let summary = h.executor.run(&steps, &network).await.unwrap();

    let produced: Vec<&str> = summary.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(produced, vec![contracts::PIXEL_PACK_FACTORY]);
    let factory = &summary.artifacts[0];
    assert_eq!(factory.network, "4");
    assert_eq!(factory.args[0].as_address(), Some(coordinator));
    assert_eq!(factory.args[1].as_address(), Some(link));

    let mint = summary.step(CREATE_PIXEL_PACK).unwrap().detail.clone().unwrap();
    assert_eq!(mint["request"]["status"], "fulfilled");
    assert!(drain(&mut h.events).contains(&"requestFulfilled"));
}

#[tokio::test]
async fn test_live_network_missing_from_table() {
    let h = harness();
    let steps = h.registry.select(&[RunMode::All]);
    let network = NetworkContext::new("42", "kovan", false);

    let failure = h.executor.run(&steps, &network).await.unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::Config(ConfigError::UnknownNetwork(ref id)) if id == "42"
    ));
    assert!(h.chain.transactions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_stops_run() {
    let chain = SimulatedChain::new();
    chain.set_automine(false).await;
    let config = DeployerConfig {
        confirmation_timeout_secs: 30,
        ..DeployerConfig::default()
    };
    let h = harness_with(chain, Arc::new(ArtifactStore::in_memory()), config);
    let steps = h.registry.select(&[RunMode::All]);

    let failure = h.executor.run(&steps, &NetworkContext::local()).await.unwrap_err();

    assert_eq!(failure.step, DEPLOY_MOCKS);
    assert!(matches!(
        failure.error,
        PipelineError::Chain(ChainError::ConfirmationTimeout { seconds: 30, .. })
    ));
    assert!(failure.summary.steps.is_empty());
    assert_eq!(h.chain.transactions().await.len(), 1);
}

#[test]
fn test_selection_is_deterministic() {
    let registry = default_registry(&DeployerConfig::default()).unwrap();
    let modes: Vec<RunMode> = ["fundLink", "mocks"].iter().map(|t| t.parse().unwrap()).collect();

    let first: Vec<&str> = registry.select(&modes).iter().map(|s| s.name.as_str()).collect();
    let second: Vec<&str> = registry.select(&modes).iter().map(|s| s.name.as_str()).collect();

    assert_eq!(first, second);
    assert_eq!(first, vec![DEPLOY_MOCKS, "deploy_pixel_packs", FUND_WITH_LINK]);
}

#[test]
fn test_fund_amount_by_network_id() {
    let table = NetworkTable::builtin();
    assert_eq!(table.fund_amount_for("31337"), U256::from(ONE_LINK));
    assert_eq!(table.fund_amount_for("1337"), U256::from(ONE_LINK));
}
