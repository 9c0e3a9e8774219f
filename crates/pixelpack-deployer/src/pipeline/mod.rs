//! Step selection and sequential execution.

pub mod executor;
pub mod registry;
pub mod step;

pub use executor::{PipelineExecutor, RunFailure, RunSummary, StepReport};
pub use registry::StepRegistry;
pub use step::{RunMode, Step, StepAction, StepContext, StepOutput, UnknownRunMode};
