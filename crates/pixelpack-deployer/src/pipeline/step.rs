//! Step definitions and run modes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::{Artifact, ArtifactStore};
use crate::chain::Transactor;
use crate::error::PipelineError;
use crate::events::EventEmitter;
use crate::network::{EnvField, EnvironmentConfig, NetworkContext};

/// A run mode, mapped one-to-one onto a step tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    All,
    Mocks,
    MockPxp,
    PxpOnly,
    FundLink,
    FundOnly,
    CreateOnly,
}

impl RunMode {
    pub const ALL_MODES: [RunMode; 7] = [
        RunMode::All,
        RunMode::Mocks,
        RunMode::MockPxp,
        RunMode::PxpOnly,
        RunMode::FundLink,
        RunMode::FundOnly,
        RunMode::CreateOnly,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            RunMode::All => "all",
            RunMode::Mocks => "mocks",
            RunMode::MockPxp => "mockpxp",
            RunMode::PxpOnly => "pxponly",
            RunMode::FundLink => "fundlink",
            RunMode::FundOnly => "fundonly",
            RunMode::CreateOnly => "createonly",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown run mode: {0}")]
pub struct UnknownRunMode(pub String);

impl FromStr for RunMode {
    type Err = UnknownRunMode;

    /// Case-insensitive, so `fundLink` and `fundlink` name the same mode.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        RunMode::ALL_MODES
            .into_iter()
            .find(|mode| mode.tag() == wanted)
            .ok_or_else(|| UnknownRunMode(s.to_string()))
    }
}

/// Everything a step action may touch.
pub struct StepContext<'a> {
    pub network: &'a NetworkContext,
    pub env: &'a EnvironmentConfig,
    pub artifacts: &'a ArtifactStore,
    pub transactor: &'a Transactor,
    pub events: &'a EventEmitter,
}

/// Result of a step action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Newly produced artifacts, persisted by the executor.
    pub artifacts: Vec<Artifact>,
    /// Names of artifacts found in the store and left untouched.
    pub reused: Vec<String>,
    /// Step-specific result, e.g. the minted token descriptor.
    pub detail: Option<serde_json::Value>,
}

impl StepOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// The work a step performs.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError>;
}

/// A named, tagged unit of work. Immutable once registered.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub tags: BTreeSet<RunMode>,
    /// Artifact names that must exist before the step runs.
    pub requires: Vec<String>,
    /// Environment fields that must resolve before the step runs.
    pub needs: Vec<EnvField>,
    action: Arc<dyn StepAction>,
}

impl Step {
    pub fn new<A: StepAction + 'static>(name: &str, action: A) -> Self {
        Self {
            name: name.to_string(),
            tags: BTreeSet::new(),
            requires: Vec::new(),
            needs: Vec::new(),
            action: Arc::new(action),
        }
    }

    pub fn tagged(mut self, modes: &[RunMode]) -> Self {
        self.tags.extend(modes.iter().copied());
        self
    }

    pub fn requires(mut self, artifacts: &[&str]) -> Self {
        self.requires.extend(artifacts.iter().map(|a| a.to_string()));
        self
    }

    pub fn needs(mut self, fields: &[EnvField]) -> Self {
        self.needs.extend(fields.iter().copied());
        self
    }

    /// Whether any tag intersects `modes`.
    pub fn matches(&self, modes: &[RunMode]) -> bool {
        modes.iter().any(|mode| self.tags.contains(mode))
    }

    pub fn action(&self) -> &dyn StepAction {
        self.action.as_ref()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("requires", &self.requires)
            .field("needs", &self.needs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StepAction for Noop {
        async fn run(&self, _ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError> {
            Ok(StepOutput::empty())
        }
    }

    #[test]
    fn test_run_mode_parse_is_case_insensitive() {
        assert_eq!("fundLink".parse::<RunMode>(), Ok(RunMode::FundLink));
        assert_eq!("FUNDLINK".parse::<RunMode>(), Ok(RunMode::FundLink));
        assert_eq!(" createonly ".parse::<RunMode>(), Ok(RunMode::CreateOnly));
        assert_eq!(
            "everything".parse::<RunMode>(),
            Err(UnknownRunMode("everything".to_string()))
        );
    }

    #[test]
    fn test_run_mode_tag_round_trip() {
        for mode in RunMode::ALL_MODES {
            assert_eq!(mode.tag().parse::<RunMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_step_matches_any_tag() {
        let step = Step::new("fund_with_link", Noop)
            .tagged(&[RunMode::All, RunMode::FundLink, RunMode::FundOnly])
            .requires(&["PixelPackFactory"]);

        assert!(step.matches(&[RunMode::FundOnly]));
        assert!(step.matches(&[RunMode::Mocks, RunMode::FundLink]));
        assert!(!step.matches(&[RunMode::Mocks]));
        assert!(!step.matches(&[]));
        assert_eq!(step.requires, vec!["PixelPackFactory".to_string()]);
    }
}
