use async_trait::async_trait;

use crate::contracts;
use crate::error::PipelineError;
use crate::funding::FundingOrchestrator;
use crate::pipeline::{StepAction, StepContext, StepOutput};

use super::{outcome_detail, required_artifact, FUND_WITH_LINK};

/// Sends the configured LINK amount to the deployed factory.
pub struct FundWithLink {
    pub skip_funded_targets: bool,
}

#[async_trait]
impl StepAction for FundWithLink {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError> {
        let factory =
            required_artifact(ctx, FUND_WITH_LINK, contracts::PIXEL_PACK_FACTORY).await?;
        tracing::info!(factory = %factory.address, "Funding contract with LINK");

        let outcome = FundingOrchestrator::new(ctx.transactor, ctx.events)
            .skip_funded_targets(self.skip_funded_targets)
            .fund(&factory, ctx.env, ctx.network)
            .await?;

        Ok(StepOutput {
            detail: outcome_detail(&outcome, FUND_WITH_LINK),
            ..StepOutput::empty()
        })
    }
}
