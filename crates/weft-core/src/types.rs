use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one workflow execution.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "capability_use")]
    CapabilityUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "capability_result")]
    CapabilityResult {
        capability_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A message in the conversation. Immutable once appended to a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn capability_result(
        capability_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::CapabilityResult {
                capability_use_id: capability_use_id.into(),
                content: content.into(),
                is_error,
            }],
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all capability use blocks from this message.
    pub fn capability_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::CapabilityUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Stop reason from the completion backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    CapabilityUse,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the completion backend.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// Start of a capability use block.
    CapabilityUseStart {
        index: usize,
        id: String,
        name: String,
    },

    /// A chunk of capability input JSON.
    CapabilityInputDelta { index: usize, delta: String },

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Result of a capability invocation.
#[derive(Debug, Clone)]
pub struct CapabilityOutcome {
    pub content: String,
    pub is_error: bool,
}

impl CapabilityOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Capability definition for sending to the completion backend.
/// Discovered once when a node is constructed; static for the node's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Workflow event broadcast to all subscribers.
///
/// Events for a given node's turn preserve the order produced by that node;
/// across nodes they preserve the visitation order of the active strategy.
/// Exactly one `FinalResult` or one `RunFailed` is emitted per execution.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// Execution started.
    RunStarted { execution_id: ExecutionId },
    /// Annotation from the orchestration strategy (handoff routing,
    /// round-manager selection, instructions).
    OrchestratorMessage { kind: String, text: String },
    /// A node began its turn.
    NodeStarted { node_id: String },
    /// Incremental text from an agent node's backend stream.
    AgentDelta { node_id: String, text: String },
    /// A node completed its turn.
    NodeCompleted {
        node_id: String,
        message: ChatMessage,
    },
    /// A capability invocation started.
    CapabilityStart {
        node_id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A capability invocation completed.
    CapabilityEnd {
        node_id: String,
        name: String,
        outcome: CapabilityOutcome,
    },
    /// The round manager forced a reset (scratch state cleared).
    RoundReset { reset_count: usize },
    /// The execution produced its final message.
    FinalResult { message: ChatMessage },
    /// The execution terminated with an error.
    RunFailed {
        node_id: Option<String>,
        error: String,
        cancelled: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text {
                    text: "Hello ".into(),
                },
                ContentBlock::CapabilityUse {
                    id: "c1".into(),
                    name: "lookup".into(),
                    input: serde_json::json!({}),
                },
                ContentBlock::Text {
                    text: "world".into(),
                },
            ],
            timestamp: None,
        };
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn test_capability_uses() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::CapabilityUse {
                id: "c1".into(),
                name: "lookup_order".into(),
                input: serde_json::json!({"order_id": "ORD-1"}),
            }],
            timestamp: None,
        };
        let uses = msg.capability_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "lookup_order");
    }

    #[test]
    fn test_capability_result_message_role() {
        let msg = ChatMessage::capability_result("c1", "ok", false);
        assert_eq!(msg.role, Role::Tool);
    }

    #[test]
    fn test_outcome_constructors() {
        assert!(!CapabilityOutcome::success("ok").is_error);
        assert!(CapabilityOutcome::error("boom").is_error);
    }
}
