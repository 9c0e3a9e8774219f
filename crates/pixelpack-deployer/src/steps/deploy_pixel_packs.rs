use alloy_primitives::Address;
use async_trait::async_trait;

use crate::chain::AbiValue;
use crate::contracts;
use crate::error::PipelineError;
use crate::pipeline::{StepAction, StepContext, StepOutput};

use super::deploy_or_reuse;

/// Deploys the `PixelPackFactory` wired to the network's coordinator and LINK token.
pub struct DeployPixelPacks;

#[async_trait]
impl StepAction for DeployPixelPacks {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError> {
        let coordinator = ctx.env.oracle_service()?;
        let link = ctx.env.funding_token()?;
        let odds = AbiValue::Array(
            contracts::attribute_odds()
                .into_iter()
                .map(AbiValue::from)
                .collect(),
        );
        let args: Vec<AbiValue> = vec![
            coordinator.into(),
            link.into(),
            ctx.env.callback_key.into(),
            ctx.env.request_fee.into(),
            odds,
        ];

        let mut output = StepOutput::empty();
        let factory =
            deploy_or_reuse(ctx, contracts::PIXEL_PACK_FACTORY, args.clone(), &mut output)
                .await?;

        let hint = verify_command(&ctx.network.name, factory, &args);
        tracing::info!(command = %hint, "Verify with");
        Ok(output.with_detail(serde_json::json!({ "verify": hint })))
    }
}

/// Contract verification command line for `address` built with `args`.
fn verify_command(network: &str, address: Address, args: &[AbiValue]) -> String {
    let mut parts = vec![format!("yarn hardhat verify --network {} {}", network, address)];
    parts.extend(args.iter().map(flatten));
    parts.join(" ")
}

fn flatten(value: &AbiValue) -> String {
    match value {
        AbiValue::Array(items) => items.iter().map(flatten).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;

    #[test]
    fn test_verify_command_flattens_arrays() {
        let address = Address::with_last_byte(1);
        let args: Vec<AbiValue> = vec![
            U256::from(7).into(),
            AbiValue::Array(vec![1u64.into(), 1000u64.into()]),
        ];
        let command = verify_command("rinkeby", address, &args);
        assert!(command.starts_with("yarn hardhat verify --network rinkeby 0x"));
        assert!(command.ends_with(" 7 1 1000"));
    }
}
