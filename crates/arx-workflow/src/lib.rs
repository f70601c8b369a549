//! Workflow Dispatch
//!
//! This crate turns events into workflow executions.
//!
//! # Architecture
//!
//! ```text
//! EVENT → [threshold rules] → ACTIVE WORKFLOWS → TRIGGERS
//!       → CEILING CHECK (tracker) → WORKER PERMIT → RUNNER
//! ```
//!
//! # Key Types
//!
//! - [`WorkflowTrigger`] - Event type plus conditions that start a workflow
//! - [`Workflow`] - Triggers, variables and the concurrency ceiling
//! - [`Execution`] - One run of a workflow
//! - [`ExecutionTracker`] - In-flight executions per workflow
//! - [`TriggerDispatcher`] - Matches events and starts executions
//! - [`WorkflowStore`] / [`ExecutionRunner`] - Seams to storage and action execution

pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod runner;
pub mod store;
pub mod tracker;
pub mod trigger;
pub mod workflow;

pub use dispatcher::{
    DispatchReport, DispatcherConfig, DispatcherStatistics, SharedRuleEngine, TriggerDispatcher,
};
pub use error::{
    DispatchError, DispatchResult, RunnerError, TrackerError, TrackerResult, WorkflowError,
    WorkflowResult,
};
pub use execution::{ActionResult, Execution, ExecutionOutcome, ExecutionResult, ExecutionStatus};
pub use runner::{ExecutionRunner, LoggingRunner, TimeoutRunner};
pub use store::{InMemoryWorkflowStore, WorkflowStore};
pub use tracker::ExecutionTracker;
pub use trigger::{TriggerType, WorkflowTrigger};
pub use workflow::{VariableType, Workflow, WorkflowStats, WorkflowStatus, WorkflowVariable};
