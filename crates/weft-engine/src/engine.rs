use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weft_capability::CapabilityRegistry;
use weft_core::config::{ModelConfig, RoundLimits};
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::state::{RunState, SharedRunState};
use weft_core::thread::Thread;
use weft_core::traits::CompletionClient;
use weft_core::types::{ChatMessage, ExecutionId, WorkflowEvent};

use crate::agent::run_agent_turn;
use crate::graph::RoutingGraph;
use crate::node::{Node, NodeOutput};
use crate::report::{NodeResult, RunOutcome, RunReport};
use crate::{handoff, pipeline, round};

/// Execution strategy for a workflow.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Follow the static edge set through an acyclic graph, each node at
    /// most once.
    Pipeline,
    /// Follow runtime transfer markers through the permitted-transfer sets.
    Handoff { mode: HandoffMode },
    /// Consult a coordinator agent each round to pick the next participant.
    RoundManager { limits: RoundLimits },
}

/// Whether a handoff run ends at the first terminal agent answer or pauses
/// for the next user message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandoffMode {
    /// One pass: the first agent answer without a transfer is the final
    /// result.
    Autonomous,
    /// Conversational: the run pauses at the active agent's answer and the
    /// next `run` call resumes from that agent.
    Interactive,
}

/// Caller-supplied progress judgment for the round manager: given the most
/// recent participant answer, did the run move forward? When absent, the
/// coordinator's own self-report is used.
pub type ProgressOracle = Arc<dyn Fn(&ChatMessage) -> bool + Send + Sync>;

/// Internal result of one strategy pass, before it is wrapped in a report.
pub(crate) struct StrategyRun {
    pub outcome: RunOutcome,
    pub results: Vec<NodeResult>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Builder for a [`Workflow`]. Validates the graph against the chosen
/// strategy and the capability registry before anything executes.
pub struct WorkflowBuilder {
    graph: Option<RoutingGraph>,
    strategy: Strategy,
    model: ModelConfig,
    llm: Option<Arc<dyn CompletionClient>>,
    registry: CapabilityRegistry,
    progress_oracle: Option<ProgressOracle>,
    cancel: CancellationToken,
    max_node_visits: usize,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            graph: None,
            strategy: Strategy::Pipeline,
            model: ModelConfig::default(),
            llm: None,
            registry: CapabilityRegistry::new(),
            progress_oracle: None,
            cancel: CancellationToken::new(),
            max_node_visits: 5,
        }
    }

    pub fn graph(mut self, graph: RoutingGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn progress_oracle<F>(mut self, oracle: F) -> Self
    where
        F: Fn(&ChatMessage) -> bool + Send + Sync + 'static,
    {
        self.progress_oracle = Some(Arc::new(oracle));
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cap on how many times one node may execute in a handoff run.
    pub fn max_node_visits(mut self, visits: usize) -> Self {
        self.max_node_visits = visits;
        self
    }

    pub fn build(self) -> Result<Workflow> {
        let graph = self
            .graph
            .ok_or_else(|| WeftError::Config("workflow requires a routing graph".into()))?;
        let llm = self
            .llm
            .ok_or_else(|| WeftError::Config("workflow requires a completion client".into()))?;

        for id in graph.node_ids() {
            if let Some(Node::Agent(agent)) = graph.node(id) {
                for name in &agent.capabilities {
                    if !self.registry.contains(name) {
                        return Err(WeftError::Config(format!(
                            "node '{id}' declares capability '{name}' which is not registered"
                        )));
                    }
                }
            }
        }

        match &self.strategy {
            Strategy::Pipeline => {
                if !graph.is_acyclic() {
                    return Err(WeftError::Config(
                        "pipeline strategy requires an acyclic edge set".into(),
                    ));
                }
            }
            Strategy::Handoff { .. } => {}
            Strategy::RoundManager { .. } => {
                if graph.len() < 2 {
                    return Err(WeftError::Config(
                        "round-manager strategy requires a coordinator and at least one participant"
                            .into(),
                    ));
                }
                if !matches!(graph.node(graph.start()), Some(Node::Agent(_))) {
                    return Err(WeftError::Config(
                        "round-manager coordinator must be an agent node".into(),
                    ));
                }
            }
        }

        Ok(Workflow {
            graph,
            strategy: self.strategy,
            model: self.model,
            llm,
            registry: Arc::new(self.registry),
            bus: Arc::new(EventBus::default()),
            thread: tokio::sync::Mutex::new(Thread::new()),
            state: Arc::new(tokio::sync::Mutex::new(RunState::new())),
            cancel: self.cancel,
            progress_oracle: self.progress_oracle,
            max_node_visits: self.max_node_visits,
            resume_node: std::sync::Mutex::new(None),
        })
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated workflow: graph + strategy + backend + capabilities.
///
/// The conversation thread persists across `run` calls, so an interactive
/// handoff conversation carries its history forward. Run state is scoped to
/// a single execution.
pub struct Workflow {
    pub(crate) graph: RoutingGraph,
    pub(crate) strategy: Strategy,
    pub(crate) model: ModelConfig,
    pub(crate) llm: Arc<dyn CompletionClient>,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) thread: tokio::sync::Mutex<Thread>,
    pub(crate) state: SharedRunState,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress_oracle: Option<ProgressOracle>,
    pub(crate) max_node_visits: usize,
    pub(crate) resume_node: std::sync::Mutex<Option<String>>,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    /// Subscribe to the event stream for this workflow.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.bus.subscribe()
    }

    /// Handle to the shared run state, for capabilities that read or write
    /// it.
    pub fn state(&self) -> SharedRunState {
        self.state.clone()
    }

    /// Token that cancels this workflow at the next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the conversation thread.
    pub async fn thread_snapshot(&self) -> Vec<ChatMessage> {
        self.thread.lock().await.snapshot()
    }

    /// Execute the workflow on one user message and wait for the outcome.
    ///
    /// Exactly one terminal event is published per call: `FinalResult` on
    /// success (including the round-limit soft outcome), `RunFailed`
    /// otherwise. Capabilities are released on every exit path.
    pub async fn run(&self, input: impl Into<String>) -> Result<RunReport> {
        let execution_id = ExecutionId::new();
        let started = Instant::now();

        self.bus.publish(WorkflowEvent::RunStarted {
            execution_id: execution_id.clone(),
        });
        info!(execution_id = %execution_id, "Workflow run started");

        let resuming = self
            .resume_node
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        if !resuming {
            *self.state.lock().await = RunState::new();
        }

        {
            let mut thread = self.thread.lock().await;
            thread.append(ChatMessage::user(input))?;
        }

        let result = self.dispatch().await;
        self.registry.close_all().await;

        match result {
            Ok(run) => {
                self.bus.publish(WorkflowEvent::FinalResult {
                    message: run.outcome.message().clone(),
                });
                info!(
                    execution_id = %execution_id,
                    turns = run.results.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Workflow run finished"
                );
                Ok(RunReport {
                    outcome: run.outcome,
                    turns: run.results,
                    total_elapsed_ms: started.elapsed().as_millis() as u64,
                    input_tokens: run.input_tokens,
                    output_tokens: run.output_tokens,
                })
            }
            Err(e) => {
                let cancelled = matches!(e, WeftError::Cancelled);
                warn!(execution_id = %execution_id, error = %e, cancelled, "Workflow run failed");
                self.bus.publish(WorkflowEvent::RunFailed {
                    node_id: error_node(&e),
                    error: e.to_string(),
                    cancelled,
                });
                Err(e)
            }
        }
    }

    /// Execute the workflow, returning the live event stream alongside a
    /// handle to the eventual report. The stream ends after the terminal
    /// event.
    pub fn run_stream(
        self: &Arc<Self>,
        input: impl Into<String>,
    ) -> (
        BoxStream<'static, WorkflowEvent>,
        tokio::task::JoinHandle<Result<RunReport>>,
    ) {
        let input = input.into();
        let mut rx = self.bus.subscribe();
        let (tx, events) = tokio::sync::mpsc::channel::<WorkflowEvent>(64);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = matches!(
                            event,
                            WorkflowEvent::FinalResult { .. } | WorkflowEvent::RunFailed { .. }
                        );
                        if tx.send(event).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let workflow = Arc::clone(self);
        let handle = tokio::spawn(async move { workflow.run(input).await });

        let stream = Box::pin(futures::stream::unfold(events, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        }));
        (stream, handle)
    }

    async fn dispatch(&self) -> Result<StrategyRun> {
        match self.strategy.clone() {
            Strategy::Pipeline => pipeline::run(self).await,
            Strategy::Handoff { mode } => handoff::run(self, mode).await,
            Strategy::RoundManager { limits } => round::run(self, &limits).await,
        }
    }
}

/// Execute one node turn, whichever kind it is. Function nodes run with the
/// state lock held for the duration of their turn.
pub(crate) async fn execute_node(
    workflow: &Workflow,
    node: &Node,
    input: &ChatMessage,
    thread: &mut Thread,
) -> Result<NodeOutput> {
    match node {
        Node::Agent(agent) => run_agent_turn(workflow, agent, thread).await,
        Node::Function(function) => {
            workflow.bus.publish(WorkflowEvent::NodeStarted {
                node_id: function.id.clone(),
            });

            let output = {
                let mut state = workflow.state.lock().await;
                function.execute(input, &mut state).await?
            };
            thread.append(output.clone())?;

            workflow.bus.publish(WorkflowEvent::NodeCompleted {
                node_id: function.id.clone(),
                message: output.clone(),
            });
            Ok(NodeOutput {
                message: output,
                transfer: None,
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }
}

/// Which node an error should be attributed to in the failure event.
fn error_node(error: &WeftError) -> Option<String> {
    match error {
        WeftError::Function { node, .. }
        | WeftError::FunctionFatal { node, .. }
        | WeftError::CapabilityLoopExceeded { node, .. } => Some(node.clone()),
        WeftError::IllegalTransfer { from, .. } => Some(from.clone()),
        _ => None,
    }
}
