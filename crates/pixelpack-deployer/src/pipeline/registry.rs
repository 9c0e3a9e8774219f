//! Step registry and selector.

use std::collections::HashSet;

use crate::error::PipelineError;

use super::step::{RunMode, Step};

/// Ordered collection of steps with unique names.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
    names: HashSet<String>,
}

impl StepRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Declaration order is execution order.
    pub fn register(&mut self, step: Step) -> Result<(), PipelineError> {
        if !self.names.insert(step.name.clone()) {
            return Err(PipelineError::DuplicateStep(step.name));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Step names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Steps with at least one tag in `modes`, in declaration order.
    pub fn select(&self, modes: &[RunMode]) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.matches(modes)).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::step::{StepAction, StepContext, StepOutput};

    struct Noop;

    #[async_trait]
    impl StepAction for Noop {
        async fn run(&self, _ctx: &StepContext<'_>) -> Result<StepOutput, PipelineError> {
            Ok(StepOutput::empty())
        }
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .register(Step::new("a", Noop).tagged(&[RunMode::All, RunMode::Mocks]))
            .unwrap();
        registry
            .register(Step::new("b", Noop).tagged(&[RunMode::All, RunMode::FundLink]))
            .unwrap();
        registry
            .register(Step::new("c", Noop).tagged(&[
                RunMode::All,
                RunMode::FundLink,
                RunMode::FundOnly,
            ]))
            .unwrap();
        registry
    }

    fn names(steps: Vec<&Step>) -> Vec<&str> {
        steps.into_iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_registry_new() {
        let registry = StepRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.select(&[RunMode::All]).is_empty());
    }

    #[test]
    fn test_select_keeps_declaration_order() {
        let registry = registry();
        assert_eq!(names(registry.select(&[RunMode::All])), vec!["a", "b", "c"]);
        assert_eq!(
            names(registry.select(&[RunMode::FundOnly, RunMode::Mocks])),
            vec!["a", "c"]
        );
        assert!(registry.select(&[RunMode::CreateOnly]).is_empty());
    }

    #[test]
    fn test_select_is_deterministic() {
        let registry = registry();
        let modes = [RunMode::FundLink, RunMode::Mocks];
        assert_eq!(names(registry.select(&modes)), names(registry.select(&modes)));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut registry = registry();
        let result = registry.register(Step::new("b", Noop));
        assert!(matches!(result, Err(PipelineError::DuplicateStep(name)) if name == "b"));
        assert_eq!(registry.len(), 3);
        assert!(registry.get("b").is_some());
    }
}
