//! Run orchestration for codesnap
//!
//! A [`RunOrchestrator`] takes one [`RunUnit`] through snapshot publishing,
//! input resolution, environment preparation, execution and reporting.

pub mod definition;
pub mod environment;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod inputs;
pub mod orchestrator;
pub mod publish;
pub mod registry;
pub mod report;
pub mod tasks;

// Re-exports
pub use definition::{EnvironmentSpec, ExecutionMode, RunDefinition, RunUnit};
pub use environment::{CommandEnvironmentBuilder, Environment, EnvironmentBuilder};
pub use error::RunError;
pub use executor::{ExecutionResult, Executor, ProcessExecutor};
pub use inputs::{InputResolver, LocalInputResolver, ResolvedInputs};
pub use orchestrator::{RunOrchestrator, RunOutcome, RunServices, RunState};
pub use publish::SnapshotPublisher;
pub use registry::{BuildRegistry, EnvironmentRegistry};
pub use report::{HttpReporter, LocalReporter, Reporter, RunReport, RunStatus};
pub use tasks::BackgroundTasks;
