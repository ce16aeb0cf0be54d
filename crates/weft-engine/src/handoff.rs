use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::types::WorkflowEvent;

use crate::engine::{execute_node, HandoffMode, StrategyRun, Workflow};
use crate::node::Node;
use crate::report::{NodeResult, RunOutcome};

/// Handoff pass: control moves between nodes via runtime transfer markers,
/// validated against each agent's permitted-transfer set, or via configured
/// auto-transfers. A node answering without either ends the pass.
///
/// In interactive mode the pass pauses there and the next `run` call
/// resumes from the same node, with the full thread intact.
pub(crate) async fn run(workflow: &Workflow, mode: HandoffMode) -> Result<StrategyRun> {
    let mut thread = workflow.thread.lock().await;
    let mut current = workflow
        .resume_node
        .lock()
        .map_err(|_| WeftError::Config("resume slot poisoned".into()))?
        .take()
        .unwrap_or_else(|| workflow.graph.start().to_string());

    let mut input = thread
        .last()
        .cloned()
        .ok_or_else(|| WeftError::Config("handoff started with an empty thread".into()))?;

    let mut visits: HashMap<String, usize> = HashMap::new();
    let mut results: Vec<NodeResult> = Vec::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    loop {
        let count = visits.entry(current.clone()).or_insert(0);
        *count += 1;
        if *count > workflow.max_node_visits {
            return Err(WeftError::Config(format!(
                "node '{current}' executed more than {} times in one handoff pass",
                workflow.max_node_visits
            )));
        }

        let node = workflow
            .graph
            .node(&current)
            .ok_or_else(|| WeftError::NodeNotFound(current.clone()))?;

        let started = Instant::now();
        let output = execute_node(workflow, node, &input, &mut thread).await?;
        input_tokens += output.input_tokens;
        output_tokens += output.output_tokens;

        results.push(NodeResult {
            node_id: current.clone(),
            output: Some(output.message.clone()),
            succeeded: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        if let Some(target) = output.transfer {
            let permitted = match node {
                Node::Agent(agent) => agent.permitted_transfers.contains(&target),
                Node::Function(_) => false,
            };
            if !permitted {
                return Err(WeftError::IllegalTransfer {
                    from: current,
                    to: target,
                });
            }
            info!(from = %current, to = %target, "Handoff");
            workflow.bus.publish(WorkflowEvent::OrchestratorMessage {
                kind: "handoff".into(),
                text: format!("{current} -> {target}"),
            });
            input = output.message;
            current = target;
            continue;
        }

        if let Some(target) = node.auto_transfer_to() {
            info!(from = %current, to = %target, "Auto transfer");
            workflow.bus.publish(WorkflowEvent::OrchestratorMessage {
                kind: "auto_transfer".into(),
                text: format!("{current} -> {target}"),
            });
            input = output.message;
            current = target.to_string();
            continue;
        }

        let outcome = match mode {
            HandoffMode::Autonomous => RunOutcome::Completed(output.message),
            HandoffMode::Interactive => {
                *workflow
                    .resume_node
                    .lock()
                    .map_err(|_| WeftError::Config("resume slot poisoned".into()))? =
                    Some(current.clone());
                RunOutcome::AwaitingInput {
                    node_id: current,
                    message: output.message,
                }
            }
        };

        return Ok(StrategyRun {
            outcome,
            results,
            input_tokens,
            output_tokens,
        });
    }
}
