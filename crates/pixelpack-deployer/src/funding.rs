//! Funding orchestrator: moves LINK from the deployer to a contract.

use alloy_primitives::{Address, B256, U256};
use serde::Serialize;

use crate::artifacts::Artifact;
use crate::chain::Transactor;
use crate::contracts::link_token;
use crate::error::{ChainError, FundingError};
use crate::events::EventEmitter;
use crate::network::{EnvironmentConfig, NetworkContext};

/// What a funding call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FundingOutcome {
    Sent { amount: U256, tx_hash: B256 },
    /// Target already held at least the fund amount.
    Skipped { balance: U256 },
}

pub struct FundingOrchestrator<'a> {
    transactor: &'a Transactor,
    events: &'a EventEmitter,
    skip_funded_targets: bool,
}

impl<'a> FundingOrchestrator<'a> {
    pub fn new(transactor: &'a Transactor, events: &'a EventEmitter) -> Self {
        Self {
            transactor,
            events,
            skip_funded_targets: false,
        }
    }

    /// Make funding a no-op for targets that already hold the fund amount.
    pub fn skip_funded_targets(mut self, skip: bool) -> Self {
        self.skip_funded_targets = skip;
        self
    }

    /// Transfer `env.fund_amount` of the funding token to `target`.
    pub async fn fund(
        &self,
        target: &Artifact,
        env: &EnvironmentConfig,
        network: &NetworkContext,
    ) -> Result<FundingOutcome, FundingError> {
        let token = env.funding_token()?;
        let amount = env.fund_amount;

        if self.skip_funded_targets {
            let balance = self.balance(token, target.address).await?;
            if balance >= amount {
                tracing::info!(
                    target = %target.name,
                    address = %target.address,
                    %balance,
                    "Target already funded, skipping transfer"
                );
                return Ok(FundingOutcome::Skipped { balance });
            }
        }

        let available = self.balance(token, self.transactor.from()).await?;
        if available < amount {
            return Err(FundingError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        tracing::debug!(
            network = %network.name,
            target = %target.name,
            %amount,
            "Funding contract with LINK"
        );

        let receipt = self
            .transactor
            .call(
                token,
                link_token::TRANSFER,
                vec![target.address.into(), amount.into()],
            )
            .await
            .map_err(|e| match e {
                ChainError::Reverted { .. } => FundingError::InsufficientBalance {
                    available,
                    required: amount,
                },
                ChainError::ConfirmationTimeout { .. } => {
                    FundingError::TransferNotConfirmed(e.to_string())
                }
                other => FundingError::Chain(other),
            })?;

        self.events.emit_funding_sent(amount, target.address);
        Ok(FundingOutcome::Sent {
            amount,
            tx_hash: receipt.transaction_hash,
        })
    }

    async fn balance(&self, token: Address, holder: Address) -> Result<U256, FundingError> {
        let value = self
            .transactor
            .read(token, link_token::BALANCE_OF, &[holder.into()])
            .await?;
        value.as_uint().ok_or_else(|| {
            FundingError::Chain(ChainError::Call {
                address: token,
                method: link_token::BALANCE_OF.to_string(),
                reason: format!("expected uint, got {}", value),
            })
        })
    }
}

impl<'a> std::fmt::Debug for FundingOrchestrator<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundingOrchestrator")
            .field("from", &self.transactor.from())
            .field("skip_funded_targets", &self.skip_funded_targets)
            .finish()
    }
}
