//! Workflow execution engine: a routing graph of agent and function nodes,
//! executed under one of three strategies (pipeline, handoff, round
//! manager), with a broadcast event stream and cooperative cancellation.

mod agent;
pub mod engine;
pub mod graph;
mod handoff;
pub mod nested;
pub mod node;
mod pipeline;
pub mod report;
mod round;

pub use engine::{HandoffMode, ProgressOracle, Strategy, Workflow, WorkflowBuilder};
pub use graph::{Edge, EdgeCondition, RoutingGraph};
pub use nested::WorkflowCapability;
pub use node::{transfer_target, AgentNode, FunctionNode, Node, NodeOutput, TRANSFER_PREFIX};
pub use report::{NodeResult, RunOutcome, RunReport};
