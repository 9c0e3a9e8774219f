//! Error types for the deployment pipeline.
//!
//! Every component returns a typed error; the executor is the only place that
//! decides what happens to the rest of a run when one of them surfaces.

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// Configuration errors. Always raised before any transaction is submitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No static table entry for a live network.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// A live network entry lacks a required address.
    #[error("Network {network} has no configured {field}")]
    MissingAddress { network: String, field: &'static str },

    /// A local dependency has not been deployed yet.
    #[error("Artifact {name} has not been deployed on network {network}")]
    MissingArtifact { name: String, network: String },

    /// Environment variable parsing failed.
    #[error("Environment error: {0}")]
    Env(String),
}

impl From<envy::Error> for ConfigError {
    fn from(err: envy::Error) -> Self {
        ConfigError::Env(err.to_string())
    }
}

/// Errors raised by the chain collaborator or while awaiting confirmations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Transaction was mined but reverted.
    #[error("Transaction {hash} reverted: {reason}")]
    Reverted { hash: B256, reason: String },

    /// Transaction did not reach the confirmation depth in time.
    #[error("Transaction {hash} not confirmed after {seconds} seconds")]
    ConfirmationTimeout { hash: B256, seconds: u64 },

    /// The client has no record of the transaction.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(B256),

    /// A read-only call failed.
    #[error("Call {method} on {address} failed: {reason}")]
    Call {
        address: Address,
        method: String,
        reason: String,
    },

    /// Transport or client level failure.
    #[error("Client error: {0}")]
    Client(String),
}

/// Errors raised by the funding orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FundingError {
    #[error("Insufficient balance: deployer holds {available}, {required} required")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("Funding transfer not confirmed: {0}")]
    TransferNotConfirmed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Errors raised by the oracle request/response workflow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The create transaction reverted or was never confirmed.
    #[error("Randomness request failed: {0}")]
    IssueFailed(String),

    /// The expected event or one of its named fields is absent.
    #[error("Malformed effect log: {0}")]
    MalformedEffectLog(String),

    /// The finalize transaction was refused, usually because fulfillment has not landed.
    #[error("Finalize rejected for token {token_id}: {reason}")]
    FinalizeRejected { token_id: U256, reason: String },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl OracleError {
    /// Whether re-invoking finalize after an additional wait may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::FinalizeRejected { .. })
    }
}

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An artifact was written for a different network than the key it was stored under.
    #[error("Artifact {name} belongs to network {actual}, not {expected}")]
    NetworkMismatch {
        name: String,
        expected: String,
        actual: String,
    },
}

/// Pipeline-level errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Step {step} requires missing artifacts: {}", missing.join(", "))]
    UnsatisfiedDependency { step: String, missing: Vec<String> },

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Transaction error: {0}")]
    Chain(#[from] ChainError),

    #[error("Funding error: {0}")]
    Funding(#[from] FundingError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("Run cancelled before step {0}")]
    Cancelled(String),
}

impl PipelineError {
    /// Short machine-readable kind, used in progress events and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "configuration",
            PipelineError::UnsatisfiedDependency { .. } => "unsatisfied_dependency",
            PipelineError::DuplicateStep(_) => "duplicate_step",
            PipelineError::Chain(_) => "transaction",
            PipelineError::Funding(_) => "funding",
            PipelineError::Oracle(_) => "oracle_workflow",
            PipelineError::Store(_) => "artifact_store",
            PipelineError::Cancelled(_) => "cancelled",
        }
    }
}
