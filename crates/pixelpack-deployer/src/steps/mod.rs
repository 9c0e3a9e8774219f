//! The deployment steps of the pixel pack pipeline.

mod create_pixel_pack;
mod deploy_mocks;
mod deploy_pixel_packs;
mod fund_with_link;

pub use create_pixel_pack::CreatePixelPack;
pub use deploy_mocks::DeployMocks;
pub use deploy_pixel_packs::DeployPixelPacks;
pub use fund_with_link::FundWithLink;

use alloy_primitives::Address;
use serde::Serialize;

use crate::artifacts::Artifact;
use crate::chain::AbiValue;
use crate::config::DeployerConfig;
use crate::contracts;
use crate::error::PipelineError;
use crate::network::EnvField;
use crate::pipeline::{RunMode, Step, StepContext, StepOutput, StepRegistry};
use crate::result_ext::ResultExt;

pub const DEPLOY_MOCKS: &str = "deploy_mocks";
pub const DEPLOY_PIXEL_PACKS: &str = "deploy_pixel_packs";
pub const FUND_WITH_LINK: &str = "fund_with_link";
pub const CREATE_PIXEL_PACK: &str = "create_pixel_pack";

/// The four steps in declaration order.
pub fn default_registry(config: &DeployerConfig) -> Result<StepRegistry, PipelineError> {
    let mut registry = StepRegistry::new();

    registry.register(
        Step::new(DEPLOY_MOCKS, DeployMocks).tagged(&[RunMode::All, RunMode::Mocks]),
    )?;

    registry.register(
        Step::new(DEPLOY_PIXEL_PACKS, DeployPixelPacks)
            .tagged(&[RunMode::All, RunMode::MockPxp, RunMode::PxpOnly, RunMode::FundLink])
            .needs(&[EnvField::FundingToken, EnvField::OracleService]),
    )?;

    registry.register(
        Step::new(
            FUND_WITH_LINK,
            FundWithLink {
                skip_funded_targets: config.skip_funded_targets,
            },
        )
        .tagged(&[RunMode::All, RunMode::FundLink, RunMode::FundOnly])
        .requires(&[contracts::PIXEL_PACK_FACTORY])
        .needs(&[EnvField::FundingToken]),
    )?;

    registry.register(
        Step::new(
            CREATE_PIXEL_PACK,
            CreatePixelPack {
                settings: config.oracle_settings(),
            },
        )
        .tagged(&[RunMode::All, RunMode::CreateOnly])
        .requires(&[contracts::PIXEL_PACK_FACTORY])
        .needs(&[EnvField::OracleService]),
    )?;

    Ok(registry)
}

/// Return the stored address of `contract`, deploying it first if the store has none
/// or the chain holds no code at the stored address.
async fn deploy_or_reuse(
    ctx: &StepContext<'_>,
    contract: &str,
    args: Vec<AbiValue>,
    output: &mut StepOutput,
) -> Result<Address, PipelineError> {
    if let Some(existing) = ctx.artifacts.get(&ctx.network.id, contract).await {
        if ctx.transactor.has_code(existing.address).await? {
            tracing::info!(contract, address = %existing.address, "Reusing deployed contract");
            output.reused.push(contract.to_string());
            return Ok(existing.address);
        }
        tracing::warn!(
            contract,
            address = %existing.address,
            "Stored artifact has no code on chain, redeploying"
        );
    }

    tracing::info!(contract, network = %ctx.network.name, "Deploying contract");
    let (address, receipt) = ctx.transactor.deploy(contract, args.clone()).await?;
    tracing::info!(
        contract,
        %address,
        tx = %receipt.transaction_hash,
        block = receipt.block_number,
        "Contract deployed"
    );

    output.artifacts.push(
        Artifact::new(contract, address, &ctx.network.id)
            .with_transaction(receipt.transaction_hash)
            .with_args(args),
    );
    Ok(address)
}

/// Stored artifact `step` has declared in `requires`.
async fn required_artifact(
    ctx: &StepContext<'_>,
    step: &str,
    name: &str,
) -> Result<Artifact, PipelineError> {
    ctx.artifacts
        .get(&ctx.network.id, name)
        .await
        .ok_or_else(|| PipelineError::UnsatisfiedDependency {
            step: step.to_string(),
            missing: vec![name.to_string()],
        })
}

/// Step outcome as report detail. An outcome that fails to serialize is logged and left out.
fn outcome_detail<T: Serialize>(outcome: &T, step: &str) -> Option<serde_json::Value> {
    serde_json::to_value(outcome)
        .log(format!("serializing {} outcome", step))
        .ok()
}
