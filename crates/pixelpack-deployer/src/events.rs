//! Progress events.
//!
//! Every event is logged through `tracing` and, when a sink is attached,
//! forwarded to an unbounded channel so callers can observe a run.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::artifacts::Artifact;

/// A progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "camelCase")]
pub enum ProgressEvent {
    StepStarted {
        step: String,
        network: String,
    },
    StepCompleted {
        step: String,
        artifacts: Vec<Artifact>,
    },
    StepFailed {
        step: String,
        kind: String,
        error: String,
    },
    RequestIssued {
        request_id: B256,
        token_id: U256,
    },
    RequestFulfilled {
        request_id: B256,
        token_id: U256,
    },
    FundingSent {
        amount: U256,
        target: Address,
    },
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::StepStarted { .. } => "stepStarted",
            ProgressEvent::StepCompleted { .. } => "stepCompleted",
            ProgressEvent::StepFailed { .. } => "stepFailed",
            ProgressEvent::RequestIssued { .. } => "requestIssued",
            ProgressEvent::RequestFulfilled { .. } => "requestFulfilled",
            ProgressEvent::FundingSent { .. } => "fundingSent",
        }
    }
}

/// Emits progress events to the log and an optional channel.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    sink: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl EventEmitter {
    /// Emitter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitter paired with a receiver that sees every event.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sink: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        tracing::debug!(event_type = event.event_type(), "Progress event");
        if let Some(sink) = &self.sink {
            // A dropped receiver just means nobody is watching.
            let _ = sink.send(event);
        }
    }

    pub fn emit_step_started(&self, step: &str, network: &str) {
        tracing::info!(step, network, "Step started");
        self.emit(ProgressEvent::StepStarted {
            step: step.to_string(),
            network: network.to_string(),
        });
    }

    pub fn emit_step_completed(&self, step: &str, artifacts: &[Artifact]) {
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        tracing::info!(step, artifacts = ?names, "Step completed");
        self.emit(ProgressEvent::StepCompleted {
            step: step.to_string(),
            artifacts: artifacts.to_vec(),
        });
    }

    pub fn emit_step_failed(&self, step: &str, kind: &str, error: &str) {
        tracing::error!(step, kind, error, "Step failed");
        self.emit(ProgressEvent::StepFailed {
            step: step.to_string(),
            kind: kind.to_string(),
            error: error.to_string(),
        });
    }

    pub fn emit_request_issued(&self, request_id: B256, token_id: U256) {
        tracing::info!(%request_id, %token_id, "Randomness requested");
        self.emit(ProgressEvent::RequestIssued { request_id, token_id });
    }

    pub fn emit_request_fulfilled(&self, request_id: B256, token_id: U256) {
        tracing::info!(%request_id, %token_id, "Randomness fulfilled");
        self.emit(ProgressEvent::RequestFulfilled { request_id, token_id });
    }

    pub fn emit_funding_sent(&self, amount: U256, target: Address) {
        tracing::info!(%amount, %target, "Funding sent");
        self.emit(ProgressEvent::FundingSent { amount, target });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_receives_events_in_order() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.emit_step_started("deploy_mocks", "31337");
        emitter.emit_funding_sent(U256::from(5), Address::with_last_byte(2));

        assert_eq!(rx.try_recv().unwrap().event_type(), "stepStarted");
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::FundingSent {
                amount: U256::from(5),
                target: Address::with_last_byte(2),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_receiver() {
        let (emitter, rx) = EventEmitter::channel();
        drop(rx);
        emitter.emit_step_failed("fund_with_link", "funding", "boom");
        EventEmitter::new().emit_step_started("deploy_mocks", "31337");
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = ProgressEvent::RequestIssued {
            request_id: B256::with_last_byte(1),
            token_id: U256::ZERO,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "requestIssued");
    }
}
