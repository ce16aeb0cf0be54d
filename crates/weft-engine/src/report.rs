use serde::{Deserialize, Serialize};

use weft_core::types::ChatMessage;

/// Per-node record of one turn within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    /// The node's output message, if it produced one.
    pub output: Option<ChatMessage>,
    pub succeeded: bool,
    pub elapsed_ms: u64,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The strategy ran to its natural terminal and produced an answer.
    Completed(ChatMessage),
    /// The round cap was reached; the best answer so far is returned
    /// rather than discarding the run.
    RoundLimitExceeded { rounds: usize, best: ChatMessage },
    /// An interactive handoff reached a terminal agent and is waiting for
    /// the next user message. Call `run` again on the same workflow to
    /// continue the conversation.
    AwaitingInput { node_id: String, message: ChatMessage },
}

impl RunOutcome {
    /// The answer carried by this outcome, whichever variant it is.
    pub fn message(&self) -> &ChatMessage {
        match self {
            RunOutcome::Completed(m) => m,
            RunOutcome::RoundLimitExceeded { best, .. } => best,
            RunOutcome::AwaitingInput { message, .. } => message,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// Summary of a finished run: outcome, per-node turns, wall time, usage.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub turns: Vec<NodeResult>,
    pub total_elapsed_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl RunReport {
    /// The final answer text.
    pub fn text(&self) -> String {
        self.outcome.message().text()
    }

    /// Ids of the nodes that executed, in order.
    pub fn visited(&self) -> Vec<&str> {
        self.turns.iter().map(|t| t.node_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_message_accessor() {
        let answer = ChatMessage::assistant_text("done");
        let completed = RunOutcome::Completed(answer.clone());
        assert_eq!(completed.message().text(), "done");
        assert!(completed.is_completed());

        let soft = RunOutcome::RoundLimitExceeded {
            rounds: 20,
            best: answer,
        };
        assert_eq!(soft.message().text(), "done");
        assert!(!soft.is_completed());
    }

    #[test]
    fn test_report_visited_order() {
        let report = RunReport {
            outcome: RunOutcome::Completed(ChatMessage::assistant_text("ok")),
            turns: vec![
                NodeResult {
                    node_id: "a".into(),
                    output: None,
                    succeeded: true,
                    elapsed_ms: 3,
                },
                NodeResult {
                    node_id: "b".into(),
                    output: None,
                    succeeded: true,
                    elapsed_ms: 5,
                },
            ],
            total_elapsed_ms: 8,
            input_tokens: 0,
            output_tokens: 0,
        };
        assert_eq!(report.visited(), vec!["a", "b"]);
        assert_eq!(report.text(), "ok");
    }
}
