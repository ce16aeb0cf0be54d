use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::error::Result;
use weft_core::state::RunState;
use weft_core::types::ChatMessage;

/// Reserved capability-name prefix for runtime control transfer.
///
/// A backend that wants to hand off control calls a capability named
/// `transfer_to_<target>` instead of answering in text. The engine treats
/// this as a routing decision, not an ordinary capability invocation.
pub const TRANSFER_PREFIX: &str = "transfer_to_";

/// Extract the destination from a transfer marker name, if it is one.
pub fn transfer_target(capability_name: &str) -> Option<&str> {
    capability_name.strip_prefix(TRANSFER_PREFIX)
}

/// A unit of work in the routing graph. Closed over its two variants:
/// agent nodes delegate to a completion backend, function nodes run a
/// deterministic local computation.
pub enum Node {
    Agent(AgentNode),
    Function(FunctionNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Agent(a) => &a.id,
            Node::Function(f) => &f.id,
        }
    }

    /// Unconditional successor, if configured (compliance-review pattern).
    pub fn auto_transfer_to(&self) -> Option<&str> {
        match self {
            Node::Agent(a) => a.auto_transfer_to.as_deref(),
            Node::Function(f) => f.auto_transfer_to.as_deref(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Agent(a) => f.debug_tuple("Agent").field(a).finish(),
            Node::Function(func) => f
                .debug_struct("Function")
                .field("id", &func.id)
                .finish_non_exhaustive(),
        }
    }
}

impl From<AgentNode> for Node {
    fn from(node: AgentNode) -> Self {
        Node::Agent(node)
    }
}

impl From<FunctionNode> for Node {
    fn from(node: FunctionNode) -> Self {
        Node::Function(node)
    }
}

/// An agent node: completion backend + declared instructions + declared
/// capability set.
///
/// The permitted-transfer set is a permission list for the handoff
/// strategy: the nodes this agent is *allowed* to transfer control to at
/// runtime. It is immutable for the lifetime of one graph instance.
#[derive(Debug, Clone)]
pub struct AgentNode {
    /// Unique identifier within the graph.
    pub id: String,
    /// System prompt for this node's backend calls.
    pub instructions: String,
    /// Names of registered capabilities this node may invoke.
    pub capabilities: Vec<String>,
    /// Durable run-state keys injected into this node's instructions.
    pub input_keys: Vec<String>,
    /// Durable run-state keys extracted from this node's answer.
    pub output_keys: Vec<String>,
    /// Nodes this agent may transfer control to at runtime.
    pub permitted_transfers: Vec<String>,
    /// Unconditional successor applied after this node completes.
    pub auto_transfer_to: Option<String>,
    /// Backend round-trip cap for the capability loop.
    pub max_capability_rounds: usize,
}

fn default_capability_rounds() -> usize {
    8
}

impl AgentNode {
    pub fn new(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            capabilities: vec![],
            input_keys: vec![],
            output_keys: vec![],
            permitted_transfers: vec![],
            auto_transfer_to: None,
            max_capability_rounds: default_capability_rounds(),
        }
    }

    /// Declare the capabilities this node may invoke.
    pub fn with_capabilities(mut self, names: Vec<String>) -> Self {
        self.capabilities = names;
        self
    }

    /// Declare the run-state keys to inject into the instructions.
    pub fn with_input_keys(mut self, keys: Vec<String>) -> Self {
        self.input_keys = keys;
        self
    }

    /// Declare the run-state keys to extract from the answer.
    pub fn with_output_keys(mut self, keys: Vec<String>) -> Self {
        self.output_keys = keys;
        self
    }

    /// Declare the nodes this agent may transfer control to.
    pub fn with_permitted_transfers(mut self, targets: Vec<String>) -> Self {
        self.permitted_transfers = targets;
        self
    }

    /// Configure an unconditional successor.
    pub fn with_auto_transfer(mut self, target: impl Into<String>) -> Self {
        self.auto_transfer_to = Some(target.into());
        self
    }

    /// Cap the backend round-trips in the capability loop.
    pub fn with_max_capability_rounds(mut self, rounds: usize) -> Self {
        self.max_capability_rounds = rounds;
        self
    }

    /// Instructions for one turn, with durable state values for the
    /// declared input keys injected ahead of the base instructions.
    pub fn build_instructions(&self, state: &RunState) -> String {
        if self.input_keys.is_empty() {
            return self.instructions.clone();
        }

        let mut instructions = String::from("## Context Data\n\n");
        for key in &self.input_keys {
            if let Some(value) = state.get(key) {
                let display = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                instructions.push_str(&format!("**{key}**: {display}\n"));
            }
        }
        instructions.push_str("\n---\n\n");
        instructions.push_str(&self.instructions);
        instructions
    }
}

/// Handler signature for function nodes: (input, run state) → message.
pub type FunctionHandler = dyn for<'a> Fn(&'a ChatMessage, &'a mut RunState) -> BoxFuture<'a, Result<ChatMessage>>
    + Send
    + Sync;

/// A function node: deterministic local computation over the input message
/// and the shared run state. Must not call the completion backend.
///
/// Errors are either recoverable (`WeftError::function`) — the execution
/// still aborts unless the pipeline declares an `OnFailure` fallback edge —
/// or fatal (`WeftError::function_fatal`).
#[derive(Clone)]
pub struct FunctionNode {
    pub id: String,
    pub auto_transfer_to: Option<String>,
    handler: Arc<FunctionHandler>,
}

impl FunctionNode {
    pub fn new<F>(id: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a ChatMessage, &'a mut RunState) -> BoxFuture<'a, Result<ChatMessage>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            auto_transfer_to: None,
            handler: Arc::new(handler),
        }
    }

    /// Configure an unconditional successor.
    pub fn with_auto_transfer(mut self, target: impl Into<String>) -> Self {
        self.auto_transfer_to = Some(target.into());
        self
    }

    pub async fn execute(&self, input: &ChatMessage, state: &mut RunState) -> Result<ChatMessage> {
        (self.handler)(input, state).await
    }
}

/// Result of one node turn.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    /// The node's final message for this turn.
    pub message: ChatMessage,
    /// Runtime-declared routing decision, if the backend emitted a
    /// destination marker.
    pub transfer: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_target() {
        assert_eq!(transfer_target("transfer_to_billing"), Some("billing"));
        assert_eq!(transfer_target("lookup_order"), None);
    }

    #[test]
    fn test_agent_node_builder() {
        let node = AgentNode::new("triage", "You are the first point of contact.")
            .with_capabilities(vec!["lookup_order".into()])
            .with_permitted_transfers(vec!["billing".into(), "shipping".into()])
            .with_max_capability_rounds(4);

        assert_eq!(node.id, "triage");
        assert_eq!(node.capabilities, vec!["lookup_order"]);
        assert_eq!(node.permitted_transfers.len(), 2);
        assert_eq!(node.max_capability_rounds, 4);
        assert!(node.auto_transfer_to.is_none());
    }

    #[test]
    fn test_build_instructions_injects_input_keys() {
        let node = AgentNode::new("planner", "Plan the trip.")
            .with_input_keys(vec!["city".into(), "budget".into()]);

        let mut state = RunState::new();
        state.set_str("city", "Paris");
        state.set("budget", serde_json::json!(1200));

        let instructions = node.build_instructions(&state);
        assert!(instructions.contains("**city**: Paris"));
        assert!(instructions.contains("**budget**: 1200"));
        assert!(instructions.ends_with("Plan the trip."));
    }

    #[test]
    fn test_build_instructions_without_input_keys() {
        let node = AgentNode::new("planner", "Plan the trip.");
        let state = RunState::new();
        assert_eq!(node.build_instructions(&state), "Plan the trip.");
    }

    #[tokio::test]
    async fn test_function_node_execute() {
        let node = FunctionNode::new("parse", |input, state| {
            Box::pin(async move {
                state.set_str("raw_request", input.text());
                Ok(ChatMessage::assistant_text(format!(
                    "parsed: {}",
                    input.text()
                )))
            })
        });

        let mut state = RunState::new();
        let out = node
            .execute(&ChatMessage::user("Plan my day"), &mut state)
            .await
            .unwrap();

        assert_eq!(out.text(), "parsed: Plan my day");
        assert_eq!(state.get_str("raw_request"), Some("Plan my day"));
    }

    #[tokio::test]
    async fn test_function_node_error_kinds() {
        use weft_core::error::WeftError;

        let node = FunctionNode::new("broken", |_, _| {
            Box::pin(async move { Err(WeftError::function("broken", "bad input")) })
        });
        let mut state = RunState::new();
        let err = node
            .execute(&ChatMessage::user("x"), &mut state)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());

        let node = FunctionNode::new("dead", |_, _| {
            Box::pin(async move { Err(WeftError::function_fatal("dead", "unrecoverable")) })
        });
        let err = node
            .execute(&ChatMessage::user("x"), &mut state)
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }
}
