use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::{CapabilityDefinition, CapabilityOutcome, ChatMessage, StreamDelta};

/// Completion backend — opaque request/response capability.
///
/// Takes an ordered message list plus declared capability schemas and
/// streams ordered deltas: text fragments, capability-call requests, and a
/// terminal stop marker. The engine never interprets output beyond these
/// structured deltas.
pub trait CompletionClient: Send + Sync + 'static {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        capabilities: &[CapabilityDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Capability — an invocable external action available to an agent node.
///
/// Transport-agnostic: a capability may be a local deterministic function,
/// a remote request/response call, or another workflow engine wrapped to
/// look like a single capability.
pub trait Capability: Send + Sync + 'static {
    /// Capability name (used in backend capability calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for capability arguments, known at discovery time.
    fn input_schema(&self) -> serde_json::Value;

    /// Invoke the capability with the given arguments.
    fn invoke(&self, input: serde_json::Value) -> BoxFuture<'_, Result<CapabilityOutcome>>;

    /// Timeout in seconds for this capability.
    fn timeout_secs(&self) -> u64 {
        30
    }

    /// Release any connection-scoped resources. Called on every execution
    /// exit path: success, error, and cancellation.
    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Definition for sending to the completion backend.
    fn definition(&self) -> CapabilityDefinition {
        CapabilityDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
