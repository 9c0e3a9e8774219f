use async_trait::async_trait;

use crate::contracts;
use crate::error::PipelineError;
use crate::pipeline::{StepAction, StepContext, StepOutput};

use super::deploy_or_reuse;

/// Deploys `LinkToken` and `VRFCoordinatorMock` on local chains. Does nothing on live networks.
pub struct DeployMocks;

#[async_trait]
impl StepAction for DeployMocks {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError> {
        let mut output = StepOutput::empty();
        if !ctx.network.is_local {
            tracing::debug!(network = %ctx.network.name, "Live network, mocks not needed");
            return Ok(output);
        }

        tracing::info!("Local network detected, deploying mocks");
        let link = deploy_or_reuse(ctx, contracts::LINK_TOKEN, vec![], &mut output).await?;
        deploy_or_reuse(
            ctx,
            contracts::VRF_COORDINATOR_MOCK,
            vec![link.into()],
            &mut output,
        )
        .await?;
        Ok(output)
    }
}
