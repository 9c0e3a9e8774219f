//! Pipeline executor.
//!
//! Runs selected steps strictly in order. Before each step the environment is
//! re-resolved, since earlier steps may have produced the artifacts it is read
//! from. The first failure stops the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::artifacts::{Artifact, ArtifactStore};
use crate::chain::Transactor;
use crate::error::PipelineError;
use crate::events::EventEmitter;
use crate::network::{NetworkContext, NetworkTable};

use super::step::{Step, StepContext};

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub produced: Vec<String>,
    pub reused: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Summary of a run, complete or partial.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub network: NetworkContext,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepReport>,
    /// Artifacts produced by this run.
    pub artifacts: Vec<Artifact>,
}

impl RunSummary {
    fn new(network: &NetworkContext) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            network: network.clone(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// A run that stopped at `step`.
#[derive(Debug, Error)]
#[error("Step {step} failed: {error}")]
pub struct RunFailure {
    pub step: String,
    #[source]
    pub error: PipelineError,
    /// What the run achieved before stopping.
    pub summary: RunSummary,
}

impl RunFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

/// Sequential step runner.
pub struct PipelineExecutor {
    table: NetworkTable,
    artifacts: Arc<ArtifactStore>,
    transactor: Transactor,
    events: EventEmitter,
    cancel: Option<watch::Receiver<bool>>,
}

impl PipelineExecutor {
    pub fn new(
        table: NetworkTable,
        artifacts: Arc<ArtifactStore>,
        transactor: Transactor,
        events: EventEmitter,
    ) -> Self {
        Self {
            table,
            artifacts,
            transactor,
            events,
            cancel: None,
        }
    }

    /// Stop before the next step once `cancel` reads `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run `steps` in the given order against `network`.
    pub async fn run(
        &self,
        steps: &[&Step],
        network: &NetworkContext,
    ) -> Result<RunSummary, RunFailure> {
        let mut summary = RunSummary::new(network);
        tracing::info!(
            run_id = %summary.run_id,
            network = %network.name,
            chain_id = %network.id,
            local = network.is_local,
            steps = steps.len(),
            "Pipeline run started"
        );

        if !network.is_local {
            if let Err((step, error)) = self.preflight(steps, network).await {
                self.events.emit_step_failed(&step, error.kind(), &error.to_string());
                return Err(RunFailure {
                    step,
                    error,
                    summary: summary.finish(),
                });
            }
        }

        for step in steps {
            if self.cancelled() {
                let error = PipelineError::Cancelled(step.name.clone());
                tracing::warn!(step = %step.name, "Run cancelled");
                return Err(RunFailure {
                    step: step.name.clone(),
                    error,
                    summary: summary.finish(),
                });
            }

            self.events.emit_step_started(&step.name, &network.id);
            match self.run_step(step, network).await {
                Ok((report, produced)) => {
                    self.events.emit_step_completed(&step.name, &produced);
                    summary.artifacts.extend(produced);
                    summary.steps.push(report);
                }
                Err(error) => {
                    self.events.emit_step_failed(&step.name, error.kind(), &error.to_string());
                    return Err(RunFailure {
                        step: step.name.clone(),
                        error,
                        summary: summary.finish(),
                    });
                }
            }
        }

        tracing::info!(
            run_id = %summary.run_id,
            produced = summary.artifacts.len(),
            "Pipeline run finished"
        );
        Ok(summary.finish())
    }

    /// Check every selected step's environment needs up front.
    async fn preflight(
        &self,
        steps: &[&Step],
        network: &NetworkContext,
    ) -> Result<(), (String, PipelineError)> {
        let first = steps.first().map(|s| s.name.clone()).unwrap_or_default();
        let env = self
            .table
            .resolve(network, &self.artifacts)
            .await
            .map_err(|e| (first, e.into()))?;

        for step in steps {
            for need in &step.needs {
                env.require(*need).map_err(|e| (step.name.clone(), e.into()))?;
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: &Step,
        network: &NetworkContext,
    ) -> Result<(StepReport, Vec<Artifact>), PipelineError> {
        let env = self.table.resolve(network, &self.artifacts).await?;

        let missing = self.artifacts.missing(&network.id, &step.requires).await;
        if !missing.is_empty() {
            return Err(PipelineError::UnsatisfiedDependency {
                step: step.name.clone(),
                missing,
            });
        }
        for need in &step.needs {
            env.require(*need)?;
        }

        let ctx = StepContext {
            network,
            env: &env,
            artifacts: &self.artifacts,
            transactor: &self.transactor,
            events: &self.events,
        };
        let output = step.action().run(&ctx).await?;

        for artifact in &output.artifacts {
            self.artifacts.put(artifact.clone()).await?;
        }

        let report = StepReport {
            name: step.name.clone(),
            produced: output.artifacts.iter().map(|a| a.name.clone()).collect(),
            reused: output.reused,
            detail: output.detail,
        };
        Ok((report, output.artifacts))
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
