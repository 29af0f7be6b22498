//! Workflow execution for LLM applications.
//!
//! A [`WorkflowEngine`] loads a graph template into a runtime graph and hands
//! its entry nodes to the [`Scheduler`], which pushes values along edges and
//! dispatches every node whose inputs are bound. A `tools` node runs the
//! agentic loop in [`tool_engine`], re-entering the scheduler for each tool
//! call the model makes.

pub mod coercion;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod graph;
pub mod handler;
pub mod nodes;
pub mod scheduler;
pub mod stream;
pub mod tool_engine;
pub mod usage;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ExecutionContext, RunBudget, RunUser};
pub use dispatch::{AssistantFragment, DispatchResult, FlowResponse, NodeParams, NodeResponse};
pub use engine::{RunOutcome, RunRequest, WorkflowEngine, WorkflowEngineBuilder};
pub use handler::{HandlerRegistry, NodeHandler};
pub use scheduler::Scheduler;
pub use stream::StreamWriter;
pub use usage::{UsageAccumulator, UsageEntry};
