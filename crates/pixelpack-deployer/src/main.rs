//! Pixel Pack deployer binary.
//!
//! Runs the tag-selected deployment pipeline against a local development chain.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixelpack_deployer::result_ext::ResultExt;
use pixelpack_deployer::{
    default_registry, ArtifactStore, DeployerConfig, EventEmitter, NetworkTable, PipelineExecutor,
    RunMode, SimulatedChain, Transactor,
};

#[derive(Parser)]
#[command(name = "pixelpack-deploy")]
#[command(version, about = "Deploy and mint Pixel Packs", long_about = None)]
struct Cli {
    /// Target network name (overrides PIXELPACK_NETWORK)
    #[arg(short, long)]
    network: Option<String>,

    /// Run modes selecting the steps, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "all")]
    tags: Vec<RunMode>,

    /// Artifact file to resume from and write to (overrides PIXELPACK_ARTIFACTS_PATH)
    #[arg(short, long)]
    artifacts: Option<PathBuf>,

    /// Skip funding when the factory already holds the fund amount
    #[arg(long)]
    skip_funded: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,pixelpack_deployer=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = DeployerConfig::from_env()?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    if cli.artifacts.is_some() {
        config.artifacts_path = cli.artifacts;
    }
    config.skip_funded_targets |= cli.skip_funded;

    init_tracing(config.log_json);
    tracing::info!(
        network = %config.network,
        tags = ?cli.tags,
        confirmations = config.confirmations,
        "Deployer configuration loaded"
    );

    let table = NetworkTable::builtin();
    let network = table.context_for(&config.network).log("resolving network")?;
    if !network.is_local {
        anyhow::bail!(
            "network {} (chain id {}) needs an RPC chain client; \
             this binary only drives local chains",
            network.name,
            network.id
        );
    }

    let chain = SimulatedChain::new();
    let transactor = Transactor::new(
        Arc::new(chain.clone()),
        chain.deployer(),
        config.confirmations,
        config.confirmation_timeout(),
    );
    let store = match &config.artifacts_path {
        Some(path) => ArtifactStore::open(path).await.log("opening artifact store")?,
        None => ArtifactStore::in_memory(),
    };

    let registry = default_registry(&config)?;
    let steps = registry.select(&cli.tags);
    if steps.is_empty() {
        tracing::warn!(tags = ?cli.tags, "No steps match the requested tags");
    }

    // Handle shutdown signals
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping after the current step");
            let _ = cancel_tx.send(true);
        }
    });

    let executor = PipelineExecutor::new(table, Arc::new(store), transactor, EventEmitter::new())
        .with_cancellation(cancel_rx);

    match executor.run(&steps, &network).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            tracing::info!(run_id = %summary.run_id, "Deployment finished");
            Ok(())
        }
        Err(failure) => {
            let produced: Vec<&str> =
                failure.summary.artifacts.iter().map(|a| a.name.as_str()).collect();
            tracing::error!(
                step = %failure.step,
                kind = failure.kind(),
                error = %failure.error,
                produced = ?produced,
                "Deployment failed"
            );
            println!("{}", serde_json::to_string_pretty(&failure.summary)?);
            Err(failure.into())
        }
    }
}
