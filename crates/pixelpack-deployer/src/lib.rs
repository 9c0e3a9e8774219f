//! Pixel Pack deployer
//!
//! Deploys the pixel pack contracts, funds the factory with LINK and drives the
//! randomness request/response mint workflow.
//!
//! This crate provides:
//! - Tag-based step selection and a sequential pipeline executor
//! - Per-network environment resolution and an artifact store
//! - LINK funding and the VRF request, fulfill, finalize cycle
//! - An in-process simulated chain for local runs and tests

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod funding;
pub mod network;
pub mod oracle;
pub mod pipeline;
pub mod result_ext;
pub mod steps;

pub use artifacts::{Artifact, ArtifactStore};
pub use chain::{ChainClient, SimulatedChain, Transactor};
pub use config::DeployerConfig;
pub use error::PipelineError;
pub use events::{EventEmitter, ProgressEvent};
pub use network::{EnvironmentConfig, NetworkContext, NetworkTable};
pub use pipeline::{PipelineExecutor, RunFailure, RunMode, RunSummary, StepRegistry};
pub use steps::default_registry;
