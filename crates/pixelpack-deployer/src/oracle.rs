//! Randomness request/response workflow for minting a pixel pack.
//!
//! Issue `generatePixelPack`, wait for the coordinator to deliver randomness,
//! then finalize with `finishMint`. On a local chain this process plays the
//! oracle and calls the coordinator mock itself. On a live network it listens
//! for the coordinator's fulfillment event, bounded by a wait, and proceeds
//! optimistically when the wait runs out.

use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use crate::chain::{find_event, AbiValue, LogEvent, Transactor};
use crate::contracts::{fields, pixel_pack_factory, vrf_coordinator};
use crate::error::{ChainError, OracleError};
use crate::events::EventEmitter;
use crate::network::NetworkContext;

/// Upper bound (exclusive) of the randomness delivered by the local coordinator mock.
const LOCAL_RANDOMNESS_BOUND: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Fulfilled,
    /// No fulfillment observed within the wait; finalize is attempted anyway.
    TimedOut,
    Failed,
}

/// An in-flight randomness request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    pub request_id: B256,
    pub token_id: U256,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub randomness: Option<U256>,
}

impl PendingRequest {
    pub fn new(request_id: B256, token_id: U256) -> Self {
        Self {
            request_id,
            token_id,
            requested_at: Utc::now(),
            status: RequestStatus::Requested,
            randomness: None,
        }
    }
}

/// Wait and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    /// How long to wait for an external fulfillment.
    pub fulfillment_wait: Duration,
    /// Extra finalize attempts on live networks.
    pub finalize_retries: u32,
    pub finalize_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            fulfillment_wait: Duration::from_secs(180),
            finalize_retries: 3,
            finalize_retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(120),
        }
    }
}

/// Result of a completed mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MintOutcome {
    pub request: PendingRequest,
    pub finalize_tx: B256,
    /// Token descriptor returned by `tokenURI`.
    pub token_uri: String,
}

pub struct OracleWorkflow<'a> {
    transactor: &'a Transactor,
    events: &'a EventEmitter,
    settings: OracleSettings,
}

impl<'a> OracleWorkflow<'a> {
    pub fn new(
        transactor: &'a Transactor,
        events: &'a EventEmitter,
        settings: OracleSettings,
    ) -> Self {
        Self {
            transactor,
            events,
            settings,
        }
    }

    /// Issue, await fulfillment and finalize one mint on `factory`.
    pub async fn run(
        &self,
        factory: Address,
        coordinator: Address,
        network: &NetworkContext,
    ) -> Result<MintOutcome, OracleError> {
        // Subscribe before issuing so a fast fulfillment is not missed.
        let subscription = (!network.is_local).then(|| self.transactor.subscribe());

        let mut request = self.issue(factory).await?;

        match subscription {
            None => self.fulfill_locally(&mut request, coordinator, factory).await?,
            Some(rx) => self.await_external_fulfillment(&mut request, coordinator, rx).await,
        }

        let finalized = if network.is_local {
            self.finalize(factory, &request).await
        } else {
            self.finalize_with_retry(factory, &request).await
        };

        match finalized {
            Ok((finalize_tx, token_uri)) => {
                tracing::info!(
                    token_id = %request.token_id,
                    status = ?request.status,
                    "Pixel pack minted"
                );
                Ok(MintOutcome {
                    request,
                    finalize_tx,
                    token_uri,
                })
            }
            Err(e) => {
                request.status = RequestStatus::Failed;
                tracing::warn!(
                    request_id = %request.request_id,
                    token_id = %request.token_id,
                    error = %e,
                    "Mint could not be finalized"
                );
                Err(e)
            }
        }
    }

    /// Submit the create call and decode the request it raised.
    pub async fn issue(&self, factory: Address) -> Result<PendingRequest, OracleError> {
        let receipt = self
            .transactor
            .call(factory, pixel_pack_factory::GENERATE, vec![])
            .await
            .map_err(|e| match e {
                ChainError::Reverted { .. } | ChainError::ConfirmationTimeout { .. } => {
                    OracleError::IssueFailed(e.to_string())
                }
                other => OracleError::Chain(other),
            })?;

        let logs = self.transactor.effect_log(&receipt);
        let (request_id, token_id) = decode_request(&logs, factory)?;
        self.events.emit_request_issued(request_id, token_id);
        Ok(PendingRequest::new(request_id, token_id))
    }

    /// Deliver randomness through the coordinator mock.
    pub async fn fulfill_locally(
        &self,
        request: &mut PendingRequest,
        coordinator: Address,
        factory: Address,
    ) -> Result<(), OracleError> {
        let randomness = U256::from(rand::thread_rng().gen_range(0..LOCAL_RANDOMNESS_BOUND));
        let receipt = self
            .transactor
            .call(
                coordinator,
                vrf_coordinator::CALLBACK_WITH_RANDOMNESS,
                vec![request.request_id.into(), randomness.into(), factory.into()],
            )
            .await?;

        let logs = self.transactor.effect_log(&receipt);
        if find_event(&logs, coordinator, vrf_coordinator::FULFILLED_EVENT).is_none() {
            return Err(OracleError::MalformedEffectLog(format!(
                "no {} event from coordinator {}",
                vrf_coordinator::FULFILLED_EVENT,
                coordinator
            )));
        }

        request.status = RequestStatus::Fulfilled;
        request.randomness = Some(randomness);
        self.events.emit_request_fulfilled(request.request_id, request.token_id);
        Ok(())
    }

    /// Wait for the coordinator's fulfillment event for `request`.
    ///
    /// Never fails: when the wait runs out or the stream closes the request is
    /// marked [`RequestStatus::TimedOut`] and finalize decides.
    pub async fn await_external_fulfillment(
        &self,
        request: &mut PendingRequest,
        coordinator: Address,
        mut rx: broadcast::Receiver<LogEvent>,
    ) {
        let deadline = Instant::now() + self.settings.fulfillment_wait;
        tracing::info!(
            request_id = %request.request_id,
            wait_secs = self.settings.fulfillment_wait.as_secs(),
            "Waiting for oracle fulfillment"
        );

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(event)) => {
                    let fulfilled = fulfillment_of(&event, coordinator, request.request_id);
                    if let Some(randomness) = fulfilled {
                        request.status = RequestStatus::Fulfilled;
                        request.randomness = randomness;
                        self.events.emit_request_fulfilled(request.request_id, request.token_id);
                        return;
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Event stream lagged while waiting for fulfillment");
                }
                Ok(Err(RecvError::Closed)) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        "Event stream closed before fulfillment"
                    );
                    break;
                }
                Err(_) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        "No fulfillment within wait, finalizing optimistically"
                    );
                    break;
                }
            }
        }
        request.status = RequestStatus::TimedOut;
    }

    /// Finalize the mint for `request` and read back the token descriptor.
    pub async fn finalize(
        &self,
        factory: Address,
        request: &PendingRequest,
    ) -> Result<(B256, String), OracleError> {
        self.verify_request_id(factory, request).await?;
        self.finish_mint(factory, request.token_id).await
    }

    /// Check that the factory correlates `request.token_id` with the issued request id.
    pub async fn verify_request_id(
        &self,
        factory: Address,
        request: &PendingRequest,
    ) -> Result<(), OracleError> {
        let on_chain = self
            .transactor
            .read(factory, pixel_pack_factory::REQUEST_ID_OF, &[request.token_id.into()])
            .await?;
        if on_chain.as_bytes32() != Some(request.request_id) {
            return Err(OracleError::FinalizeRejected {
                token_id: request.token_id,
                reason: format!(
                    "request id mismatch: issued {}, factory holds {}",
                    request.request_id, on_chain
                ),
            });
        }
        Ok(())
    }

    async fn finish_mint(
        &self,
        factory: Address,
        token_id: U256,
    ) -> Result<(B256, String), OracleError> {
        let receipt = self
            .transactor
            .call(factory, pixel_pack_factory::FINISH_MINT, vec![token_id.into()])
            .await
            .map_err(|e| match e {
                ChainError::Reverted { reason, .. } => {
                    OracleError::FinalizeRejected { token_id, reason }
                }
                other => OracleError::Chain(other),
            })?;

        let uri = self
            .transactor
            .read(factory, pixel_pack_factory::TOKEN_URI, &[token_id.into()])
            .await?;
        match uri {
            AbiValue::String(uri) if !uri.is_empty() => Ok((receipt.transaction_hash, uri)),
            other => Err(OracleError::Chain(ChainError::Call {
                address: factory,
                method: pixel_pack_factory::TOKEN_URI.to_string(),
                reason: format!("empty or non-string descriptor: {}", other),
            })),
        }
    }

    /// [`finalize`](Self::finalize) with retry and capped exponential backoff.
    ///
    /// A request id mismatch is permanent and fails at once; only `finishMint`
    /// rejections are retried.
    pub async fn finalize_with_retry(
        &self,
        factory: Address,
        request: &PendingRequest,
    ) -> Result<(B256, String), OracleError> {
        self.verify_request_id(factory, request).await?;

        let mut delay = self.settings.finalize_retry_delay;
        let mut attempt = 0;

        loop {
            match self.finish_mint(factory, request.token_id).await {
                Ok(done) => return Ok(done),
                Err(e) if e.is_retryable() && attempt < self.settings.finalize_retries => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.settings.finalize_retries,
                        error = %e,
                        token_id = %request.token_id,
                        "Finalize rejected, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.settings.max_retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decode `PixelPackRequested` from `factory` by event and field name.
pub fn decode_request(logs: &[LogEvent], factory: Address) -> Result<(B256, U256), OracleError> {
    let event = find_event(logs, factory, pixel_pack_factory::REQUESTED_EVENT).ok_or_else(|| {
        OracleError::MalformedEffectLog(format!(
            "no {} event from {}",
            pixel_pack_factory::REQUESTED_EVENT,
            factory
        ))
    })?;

    let missing =
        |field: &str| OracleError::MalformedEffectLog(format!("{} missing {}", event.name, field));
    let request_id = event
        .field(fields::REQUEST_ID)
        .and_then(AbiValue::as_bytes32)
        .ok_or_else(|| missing(fields::REQUEST_ID))?;
    let token_id = event
        .field(fields::TOKEN_ID)
        .and_then(AbiValue::as_uint)
        .ok_or_else(|| missing(fields::TOKEN_ID))?;

    Ok((request_id, token_id))
}

/// Randomness carried by `event` if it fulfils `request_id`. `Some(None)` means
/// a match without an output field.
fn fulfillment_of(
    event: &LogEvent,
    coordinator: Address,
    request_id: B256,
) -> Option<Option<U256>> {
    let matches = event.address == coordinator
        && event.name == vrf_coordinator::FULFILLED_EVENT
        && event.field(fields::REQUEST_ID).and_then(AbiValue::as_bytes32) == Some(request_id);
    matches.then(|| event.field(fields::OUTPUT).and_then(AbiValue::as_uint))
}

impl<'a> std::fmt::Debug for OracleWorkflow<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleWorkflow")
            .field("settings", &self.settings)
            .finish()
    }
}
