use std::time::Instant;

use serde::Deserialize;
use tracing::{info, warn};

use weft_core::config::RoundLimits;
use weft_core::error::{Result, WeftError};
use weft_core::types::{ChatMessage, WorkflowEvent};

use crate::agent::run_agent_turn;
use crate::engine::{execute_node, StrategyRun, Workflow};
use crate::node::Node;
use crate::report::{NodeResult, RunOutcome};

/// Directive emitted by the coordinator agent each round, as a JSON object
/// embedded in its answer text.
#[derive(Debug, Deserialize)]
struct ManagerDirective {
    #[serde(default)]
    next_participant: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default = "default_progress")]
    made_progress: bool,
    #[serde(default)]
    final_answer: Option<String>,
}

fn default_progress() -> bool {
    true
}

impl ManagerDirective {
    /// Parse the first JSON object embedded in the coordinator's text. The
    /// coordinator not producing one is a configuration problem, not a
    /// recoverable condition.
    fn parse(text: &str) -> Result<Self> {
        let open = text.find('{');
        let close = text.rfind('}');
        let body = match (open, close) {
            (Some(open), Some(close)) if close > open => &text[open..=close],
            _ => {
                return Err(WeftError::Config(format!(
                    "coordinator answer contains no directive object: {text}"
                )))
            }
        };
        serde_json::from_str(body).map_err(|e| {
            WeftError::Config(format!("coordinator directive is not valid JSON: {e}"))
        })
    }
}

/// Round-manager pass: the coordinator (the graph's start node) is
/// consulted before every participant turn and decides who acts next, what
/// extra instruction they get, and when the run is done.
///
/// Stalling rounds trigger a forced reset that clears scratch state but
/// keeps the thread. Hitting the round cap is a soft outcome carrying the
/// best answer so far; exhausting resets is a hard error.
pub(crate) async fn run(workflow: &Workflow, limits: &RoundLimits) -> Result<StrategyRun> {
    let mut thread = workflow.thread.lock().await;

    let coordinator_id = workflow.graph.start().to_string();
    let coordinator = match workflow.graph.node(&coordinator_id) {
        Some(Node::Agent(agent)) => agent,
        _ => {
            return Err(WeftError::Config(
                "round-manager coordinator must be an agent node".into(),
            ))
        }
    };
    let participants: Vec<String> = workflow
        .graph
        .node_ids()
        .iter()
        .filter(|id| **id != coordinator_id)
        .cloned()
        .collect();

    let mut round_count = 0usize;
    let mut stall_count = 0usize;
    let mut reset_count = 0usize;
    let mut first_round = true;
    let mut last_answer: Option<ChatMessage> = None;
    let mut results: Vec<NodeResult> = Vec::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    loop {
        let started = Instant::now();
        let consult = run_agent_turn(workflow, coordinator, &mut thread).await?;
        input_tokens += consult.input_tokens;
        output_tokens += consult.output_tokens;
        results.push(NodeResult {
            node_id: coordinator_id.clone(),
            output: Some(consult.message.clone()),
            succeeded: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        let directive = ManagerDirective::parse(&consult.message.text())?;
        workflow.bus.publish(WorkflowEvent::OrchestratorMessage {
            kind: "directive".into(),
            text: consult.message.text(),
        });

        if let Some(answer) = directive.final_answer {
            let message = ChatMessage::assistant_text(answer);
            thread.append(message.clone())?;
            info!(rounds = round_count, "Round manager produced a final answer");
            return Ok(StrategyRun {
                outcome: RunOutcome::Completed(message),
                results,
                input_tokens,
                output_tokens,
            });
        }

        if !first_round {
            let progressed = match (&workflow.progress_oracle, &last_answer) {
                (Some(oracle), Some(answer)) => oracle(answer),
                _ => directive.made_progress,
            };
            if progressed {
                stall_count = 0;
            } else {
                stall_count += 1;
            }

            if stall_count >= limits.max_stall_count {
                reset_count += 1;
                if reset_count > limits.max_reset_count {
                    return Err(WeftError::ResetLimitExceeded {
                        resets: reset_count,
                    });
                }
                warn!(reset_count, "Stall limit reached, forcing a reset");
                workflow.state.lock().await.clear_scratch();
                stall_count = 0;
                workflow
                    .bus
                    .publish(WorkflowEvent::RoundReset { reset_count });
                continue;
            }
        }

        if round_count >= limits.max_round_count {
            let best = last_answer.unwrap_or(consult.message);
            warn!(rounds = round_count, "Round cap reached, returning best answer so far");
            return Ok(StrategyRun {
                outcome: RunOutcome::RoundLimitExceeded {
                    rounds: round_count,
                    best,
                },
                results,
                input_tokens,
                output_tokens,
            });
        }

        let next = directive.next_participant.ok_or_else(|| {
            WeftError::Config("coordinator directive names neither a participant nor a final answer".into())
        })?;
        if !participants.contains(&next) {
            return Err(WeftError::IllegalTransfer {
                from: coordinator_id.clone(),
                to: next,
            });
        }

        if let Some(instruction) = directive.instruction {
            thread.append(ChatMessage::user(instruction.as_str()))?;
            workflow.bus.publish(WorkflowEvent::OrchestratorMessage {
                kind: "instruction".into(),
                text: instruction,
            });
        }

        workflow.bus.publish(WorkflowEvent::OrchestratorMessage {
            kind: "select".into(),
            text: next.clone(),
        });

        let node = workflow
            .graph
            .node(&next)
            .ok_or_else(|| WeftError::NodeNotFound(next.clone()))?;
        let participant_input = thread
            .last()
            .cloned()
            .ok_or_else(|| WeftError::Config("round started with an empty thread".into()))?;

        let started = Instant::now();
        let output = execute_node(workflow, node, &participant_input, &mut thread).await?;
        input_tokens += output.input_tokens;
        output_tokens += output.output_tokens;
        results.push(NodeResult {
            node_id: next.clone(),
            output: Some(output.message.clone()),
            succeeded: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        round_count += 1;
        last_answer = Some(output.message);
        first_round = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_parse_embedded_json() {
        let directive = ManagerDirective::parse(
            r#"Thinking it over. {"next_participant": "researcher", "instruction": "Find sources.", "made_progress": false}"#,
        )
        .unwrap();
        assert_eq!(directive.next_participant.as_deref(), Some("researcher"));
        assert_eq!(directive.instruction.as_deref(), Some("Find sources."));
        assert!(!directive.made_progress);
        assert!(directive.final_answer.is_none());
    }

    #[test]
    fn test_directive_parse_defaults() {
        let directive = ManagerDirective::parse(r#"{"next_participant": "writer"}"#).unwrap();
        assert!(directive.made_progress);
    }

    #[test]
    fn test_directive_parse_failure_is_config_error() {
        assert!(matches!(
            ManagerDirective::parse("no json here"),
            Err(WeftError::Config(_))
        ));
        assert!(matches!(
            ManagerDirective::parse("{not valid}"),
            Err(WeftError::Config(_))
        ));
    }

    #[test]
    fn test_directive_final_answer() {
        let directive =
            ManagerDirective::parse(r#"{"final_answer": "The plan is ready."}"#).unwrap();
        assert_eq!(directive.final_answer.as_deref(), Some("The plan is ready."));
    }
}
