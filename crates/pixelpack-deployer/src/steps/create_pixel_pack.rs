use async_trait::async_trait;

use crate::contracts;
use crate::error::PipelineError;
use crate::oracle::{OracleSettings, OracleWorkflow};
use crate::pipeline::{StepAction, StepContext, StepOutput};

use super::{outcome_detail, required_artifact, CREATE_PIXEL_PACK};

/// Mints one pixel pack through the randomness request workflow.
pub struct CreatePixelPack {
    pub settings: OracleSettings,
}

#[async_trait]
impl StepAction for CreatePixelPack {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError> {
        let factory =
            required_artifact(ctx, CREATE_PIXEL_PACK, contracts::PIXEL_PACK_FACTORY).await?;
        let coordinator = ctx.env.oracle_service()?;

        tracing::info!(factory = %factory.address, "Generating pixel pack");
        let outcome = OracleWorkflow::new(ctx.transactor, ctx.events, self.settings.clone())
            .run(factory.address, coordinator, ctx.network)
            .await?;
        tracing::info!(
            token_id = %outcome.request.token_id,
            token_uri = %outcome.token_uri,
            "Minting complete"
        );

        Ok(StepOutput {
            detail: outcome_detail(&outcome, CREATE_PIXEL_PACK),
            ..StepOutput::empty()
        })
    }
}
