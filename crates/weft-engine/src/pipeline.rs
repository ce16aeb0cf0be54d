use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::types::{ChatMessage, WorkflowEvent};

use crate::engine::{execute_node, StrategyRun, Workflow};
use crate::report::{NodeResult, RunOutcome};

/// Pipeline pass: breadth-first over the static edge set, each node at most
/// once. The final result is the output of the last node executed.
///
/// A recoverable function-node failure only continues the run when the node
/// declares an `OnFailure` fallback edge; the error text then becomes the
/// input to the fallback branch.
pub(crate) async fn run(workflow: &Workflow) -> Result<StrategyRun> {
    let mut thread = workflow.thread.lock().await;
    let start_input = thread
        .last()
        .cloned()
        .ok_or_else(|| WeftError::Config("pipeline started with an empty thread".into()))?;

    let mut queue: VecDeque<(String, ChatMessage)> = VecDeque::new();
    queue.push_back((workflow.graph.start().to_string(), start_input));

    let mut visited: HashSet<String> = HashSet::new();
    let mut results: Vec<NodeResult> = Vec::new();
    let mut final_message: Option<ChatMessage> = None;
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    while let Some((node_id, input)) = queue.pop_front() {
        if !visited.insert(node_id.clone()) {
            debug!(node_id = %node_id, "Skipping already-executed pipeline node");
            continue;
        }
        let node = workflow
            .graph
            .node(&node_id)
            .ok_or_else(|| WeftError::NodeNotFound(node_id.clone()))?;

        let started = Instant::now();
        let (message, succeeded) = match execute_node(workflow, node, &input, &mut thread).await {
            Ok(output) => {
                if let Some(target) = &output.transfer {
                    warn!(node_id = %node_id, target = %target, "Transfer marker ignored in pipeline strategy");
                }
                input_tokens += output.input_tokens;
                output_tokens += output.output_tokens;
                (output.message, true)
            }
            Err(e) if e.is_recoverable() && has_fallback(workflow, &node_id) => {
                warn!(node_id = %node_id, error = %e, "Node failed, taking fallback edge");
                let message = ChatMessage::assistant_text(e.to_string());
                thread.append(message.clone())?;
                workflow.bus.publish(WorkflowEvent::NodeCompleted {
                    node_id: node_id.clone(),
                    message: message.clone(),
                });
                (message, false)
            }
            Err(e) => return Err(e),
        };

        results.push(NodeResult {
            node_id: node_id.clone(),
            output: Some(message.clone()),
            succeeded,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        for edge in workflow.graph.outgoing(&node_id) {
            if edge.matches(succeeded) {
                queue.push_back((edge.to.clone(), message.clone()));
            }
        }
        final_message = Some(message);
    }

    let final_message = final_message
        .ok_or_else(|| WeftError::Config("pipeline executed no nodes".into()))?;

    Ok(StrategyRun {
        outcome: RunOutcome::Completed(final_message),
        results,
        input_tokens,
        output_tokens,
    })
}

fn has_fallback(workflow: &Workflow, node_id: &str) -> bool {
    workflow
        .graph
        .outgoing(node_id)
        .iter()
        .any(|edge| edge.matches(false))
}
