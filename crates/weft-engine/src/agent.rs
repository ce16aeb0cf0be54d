use std::collections::BTreeMap;

use futures::StreamExt;
use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::thread::Thread;
use weft_core::types::{
    CapabilityDefinition, CapabilityOutcome, ChatMessage, ContentBlock, Role, StreamDelta,
    WorkflowEvent,
};

use crate::engine::Workflow;
use crate::node::{transfer_target, AgentNode, NodeOutput, TRANSFER_PREFIX};

/// Accumulates capability-call fragments from the delta stream, keyed by
/// block index. Input JSON arrives in chunks and is parsed once at stop.
#[derive(Default)]
struct CallAccumulator {
    calls: BTreeMap<usize, PendingCall>,
}

struct PendingCall {
    id: String,
    name: String,
    input_json: String,
}

impl CallAccumulator {
    fn start(&mut self, index: usize, id: String, name: String) {
        self.calls.insert(
            index,
            PendingCall {
                id,
                name,
                input_json: String::new(),
            },
        );
    }

    fn push_input(&mut self, index: usize, delta: &str) {
        if let Some(call) = self.calls.get_mut(&index) {
            call.input_json.push_str(delta);
        }
    }

    fn finish(self) -> Vec<(String, String, serde_json::Value)> {
        self.calls
            .into_values()
            .map(|call| {
                let input = if call.input_json.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&call.input_json)
                        .unwrap_or(serde_json::Value::String(call.input_json))
                };
                (call.id, call.name, input)
            })
            .collect()
    }
}

/// Capability definitions offered to the backend for one agent turn: the
/// node's declared capabilities plus one synthetic transfer marker per
/// permitted transfer target.
fn turn_definitions(workflow: &Workflow, node: &AgentNode) -> Result<Vec<CapabilityDefinition>> {
    let mut defs = Vec::with_capacity(node.capabilities.len() + node.permitted_transfers.len());
    for name in &node.capabilities {
        let capability = workflow
            .registry
            .get(name)
            .ok_or_else(|| WeftError::CapabilityNotFound(name.clone()))?;
        defs.push(capability.definition());
    }
    for target in &node.permitted_transfers {
        defs.push(CapabilityDefinition {
            name: format!("{TRANSFER_PREFIX}{target}"),
            description: format!("Transfer this conversation to the '{target}' agent."),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        });
    }
    Ok(defs)
}

/// Run one agent node turn: stream the backend, execute requested
/// capabilities, repeat until the backend stops asking, and surface any
/// transfer marker as a routing decision.
///
/// Appends the assistant and capability-result messages it produces to the
/// thread. Bounded by the node's capability-round cap.
pub(crate) async fn run_agent_turn(
    workflow: &Workflow,
    node: &AgentNode,
    thread: &mut Thread,
) -> Result<NodeOutput> {
    workflow.bus.publish(WorkflowEvent::NodeStarted {
        node_id: node.id.clone(),
    });

    let defs = turn_definitions(workflow, node)?;
    let instructions = {
        let state = workflow.state.lock().await;
        node.build_instructions(&state)
    };
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    for round in 0..node.max_capability_rounds {
        if workflow.cancel.is_cancelled() {
            return Err(WeftError::Cancelled);
        }

        let mut messages = Vec::with_capacity(thread.len() + 1);
        messages.push(ChatMessage::system(instructions.as_str()));
        messages.extend(thread.snapshot());

        debug!(node_id = %node.id, round, messages = messages.len(), "Agent backend call");

        let mut stream = tokio::select! {
            _ = workflow.cancel.cancelled() => return Err(WeftError::Cancelled),
            stream = workflow.llm.chat_stream(&workflow.model, messages, &defs) => stream?,
        };

        let mut text = String::new();
        let mut accumulator = CallAccumulator::default();

        loop {
            let delta = tokio::select! {
                _ = workflow.cancel.cancelled() => return Err(WeftError::Cancelled),
                delta = stream.next() => match delta {
                    Some(delta) => delta?,
                    None => break,
                },
            };

            match delta {
                StreamDelta::TextDelta(chunk) => {
                    workflow.bus.publish(WorkflowEvent::AgentDelta {
                        node_id: node.id.clone(),
                        text: chunk.clone(),
                    });
                    text.push_str(&chunk);
                }
                StreamDelta::CapabilityUseStart { index, id, name } => {
                    accumulator.start(index, id, name);
                }
                StreamDelta::CapabilityInputDelta { index, delta } => {
                    accumulator.push_input(index, &delta);
                }
                StreamDelta::Usage {
                    input_tokens: it,
                    output_tokens: ot,
                } => {
                    input_tokens += it;
                    output_tokens += ot;
                }
                StreamDelta::Stop(_) => {}
            }
        }
        drop(stream);

        let calls = accumulator.finish();
        if text.is_empty() && calls.is_empty() {
            return Err(WeftError::Backend(format!(
                "backend returned an empty response for node '{}'",
                node.id
            )));
        }

        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.clone() });
        }
        for (id, name, input) in &calls {
            content.push(ContentBlock::CapabilityUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            });
        }
        let assistant = ChatMessage {
            role: Role::Assistant,
            content,
            timestamp: Some(chrono::Utc::now()),
        };
        thread.append(assistant.clone())?;

        // First transfer marker wins; later markers in the same response
        // still get a synthetic result so the thread stays well-formed.
        let mut transfer: Option<String> = None;
        let mut result_blocks = Vec::new();
        let mut ordinary = Vec::new();

        for (id, name, input) in calls {
            if let Some(target) = transfer_target(&name) {
                if transfer.is_none() {
                    transfer = Some(target.to_string());
                } else {
                    warn!(node_id = %node.id, target, "Ignoring extra transfer marker");
                }
                result_blocks.push(ContentBlock::CapabilityResult {
                    capability_use_id: id,
                    content: format!("Transferring to {target}."),
                    is_error: false,
                });
            } else {
                ordinary.push((id, name, input));
            }
        }

        for (id, name, input) in ordinary.iter() {
            workflow.bus.publish(WorkflowEvent::CapabilityStart {
                node_id: node.id.clone(),
                name: name.clone(),
                input: input.clone(),
            });

            let invocation = tokio::select! {
                _ = workflow.cancel.cancelled() => return Err(WeftError::Cancelled),
                outcome = workflow.registry.invoke(name, input.clone()) => outcome,
            };
            // Invocation failures go back to the backend as error results
            // rather than aborting the turn.
            let outcome = match invocation {
                Ok(outcome) => outcome,
                Err(e @ WeftError::CapabilityNotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(node_id = %node.id, capability = %name, error = %e, "Capability failed");
                    CapabilityOutcome::error(e.to_string())
                }
            };

            workflow.bus.publish(WorkflowEvent::CapabilityEnd {
                node_id: node.id.clone(),
                name: name.clone(),
                outcome: outcome.clone(),
            });

            result_blocks.push(ContentBlock::CapabilityResult {
                capability_use_id: id.clone(),
                content: outcome.content,
                is_error: outcome.is_error,
            });
        }

        if !result_blocks.is_empty() {
            thread.append(ChatMessage {
                role: Role::Tool,
                content: result_blocks,
                timestamp: Some(chrono::Utc::now()),
            })?;
        }

        if transfer.is_some() || ordinary.is_empty() {
            if !node.output_keys.is_empty() {
                workflow
                    .state
                    .lock()
                    .await
                    .ingest_output(&node.output_keys, &text);
            }
            workflow.bus.publish(WorkflowEvent::NodeCompleted {
                node_id: node.id.clone(),
                message: assistant.clone(),
            });
            return Ok(NodeOutput {
                message: assistant,
                transfer,
                input_tokens,
                output_tokens,
            });
        }
    }

    Err(WeftError::CapabilityLoopExceeded {
        node: node.id.clone(),
        rounds: node.max_capability_rounds,
    })
}
