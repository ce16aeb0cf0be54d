use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};

use crate::node::Node;

/// An edge connecting two nodes in the routing graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Condition that must hold to traverse this edge.
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Condition for traversing an edge, evaluated in declaration order.
///
/// A failed source node flows only down `OnFailure` fallback edges; a
/// node with no fallback edge aborts the run on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Traverse after every successful turn (the default).
    #[default]
    Always,
    /// Traverse only if the source node succeeded.
    OnSuccess,
    /// Traverse only if the source node failed recoverably (fallback edge).
    OnFailure,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Always,
        }
    }

    /// Create an edge that fires on success.
    pub fn on_success(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::OnSuccess,
        }
    }

    /// Create a fallback edge that fires on recoverable failure.
    pub fn on_failure(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::OnFailure,
        }
    }

    /// Whether this edge fires given the source node's success flag.
    pub fn matches(&self, succeeded: bool) -> bool {
        match self.condition {
            EdgeCondition::Always | EdgeCondition::OnSuccess => succeeded,
            EdgeCondition::OnFailure => !succeeded,
        }
    }
}

/// Directed graph of nodes and edges.
///
/// Static edges drive the pipeline strategy; per-agent permitted-transfer
/// sets drive the handoff strategy. Both are fixed once the graph is built.
pub struct RoutingGraph {
    nodes: HashMap<String, Node>,
    /// Node ids in declaration order.
    order: Vec<String>,
    edges: Vec<Edge>,
    start: String,
}

impl RoutingGraph {
    /// Build a graph, validating that the start node exists, every edge
    /// endpoint exists, and every declared transfer target exists.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, start: impl Into<String>) -> Result<Self> {
        let start = start.into();
        let mut order = Vec::with_capacity(nodes.len());
        let mut node_map = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let id = node.id().to_string();
            if node_map.insert(id.clone(), node).is_some() {
                return Err(WeftError::Config(format!("duplicate node id '{id}'")));
            }
            order.push(id);
        }

        if !node_map.contains_key(&start) {
            return Err(WeftError::NodeNotFound(start));
        }

        for edge in &edges {
            for endpoint in [&edge.from, &edge.to] {
                if !node_map.contains_key(endpoint) {
                    return Err(WeftError::Config(format!(
                        "edge references unknown node '{endpoint}'"
                    )));
                }
            }
        }

        for (id, node) in &node_map {
            let targets: Vec<&str> = match node {
                Node::Agent(a) => a
                    .permitted_transfers
                    .iter()
                    .map(String::as_str)
                    .chain(a.auto_transfer_to.as_deref())
                    .collect(),
                Node::Function(f) => f.auto_transfer_to.as_deref().into_iter().collect(),
            };
            for target in targets {
                if !node_map.contains_key(target) {
                    return Err(WeftError::Config(format!(
                        "node '{id}' declares transfer target '{target}' which does not exist"
                    )));
                }
            }
        }

        Ok(Self {
            nodes: node_map,
            order,
            edges,
            start,
        })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Node ids in declaration order.
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Outgoing edges for a node, in declaration order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    /// Whether the static edge set contains no cycle. Required by the
    /// pipeline strategy, which visits each node at most once.
    pub fn is_acyclic(&self) -> bool {
        // Iterative DFS with three-color marking.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }
        let mut marks: HashMap<&str, Mark> =
            self.order.iter().map(|id| (id.as_str(), Mark::White)).collect();

        for root in &self.order {
            if marks[root.as_str()] != Mark::White {
                continue;
            }
            let mut stack: Vec<(&str, bool)> = vec![(root.as_str(), false)];
            while let Some((id, done)) = stack.pop() {
                if done {
                    marks.insert(id, Mark::Black);
                    continue;
                }
                if marks[id] == Mark::Black {
                    continue;
                }
                marks.insert(id, Mark::Gray);
                stack.push((id, true));
                for edge in self.outgoing(id) {
                    match marks[edge.to.as_str()] {
                        Mark::Gray => return false,
                        Mark::White => stack.push((edge.to.as_str(), false)),
                        Mark::Black => {}
                    }
                }
            }
        }
        true
    }

    /// Permitted transfer targets for an agent node (empty for others).
    pub fn permitted(&self, id: &str) -> &[String] {
        match self.nodes.get(id) {
            Some(Node::Agent(a)) => &a.permitted_transfers,
            _ => &[],
        }
    }

    /// Check that a set of node ids all exist; used by strategy validation.
    pub fn contains_all<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> bool {
        ids.into_iter().all(|id| self.nodes.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AgentNode;

    fn agent(id: &str) -> Node {
        AgentNode::new(id, format!("You are {id}.")).into()
    }

    #[test]
    fn test_build_and_lookup() {
        let graph = RoutingGraph::new(
            vec![agent("a"), agent("b")],
            vec![Edge::always("a", "b")],
            "a",
        )
        .unwrap();

        assert_eq!(graph.start(), "a");
        assert_eq!(graph.len(), 2);
        assert!(graph.has_node("b"));
        assert_eq!(graph.outgoing("a").len(), 1);
        assert!(graph.outgoing("b").is_empty());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let result = RoutingGraph::new(vec![agent("a"), agent("a")], vec![], "a");
        assert!(matches!(result, Err(WeftError::Config(_))));
    }

    #[test]
    fn test_unknown_start_rejected() {
        let result = RoutingGraph::new(vec![agent("a")], vec![], "missing");
        assert!(matches!(result, Err(WeftError::NodeNotFound(_))));
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let result = RoutingGraph::new(vec![agent("a")], vec![Edge::always("a", "ghost")], "a");
        assert!(matches!(result, Err(WeftError::Config(_))));
    }

    #[test]
    fn test_permitted_transfer_target_must_exist() {
        let triage: Node = AgentNode::new("triage", "Route requests.")
            .with_permitted_transfers(vec!["billing".into()])
            .into();
        let result = RoutingGraph::new(vec![triage], vec![], "triage");
        assert!(matches!(result, Err(WeftError::Config(_))));
    }

    #[test]
    fn test_acyclic_detection() {
        let chain = RoutingGraph::new(
            vec![agent("a"), agent("b"), agent("c")],
            vec![Edge::always("a", "b"), Edge::always("b", "c")],
            "a",
        )
        .unwrap();
        assert!(chain.is_acyclic());

        let cycle = RoutingGraph::new(
            vec![agent("a"), agent("b")],
            vec![Edge::always("a", "b"), Edge::always("b", "a")],
            "a",
        )
        .unwrap();
        assert!(!cycle.is_acyclic());
    }

    #[test]
    fn test_fan_out_declared_order() {
        let graph = RoutingGraph::new(
            vec![agent("a"), agent("b"), agent("c")],
            vec![Edge::always("a", "c"), Edge::always("a", "b")],
            "a",
        )
        .unwrap();

        let targets: Vec<&str> = graph.outgoing("a").iter().map(|e| e.to.as_str()).collect();
        assert_eq!(targets, vec!["c", "b"]);
    }

    #[test]
    fn test_edge_condition_matching() {
        assert!(Edge::always("a", "b").matches(true));
        assert!(!Edge::always("a", "b").matches(false));
        assert!(Edge::on_success("a", "b").matches(true));
        assert!(!Edge::on_success("a", "b").matches(false));
        assert!(Edge::on_failure("a", "b").matches(false));
        assert!(!Edge::on_failure("a", "b").matches(true));
    }
}
