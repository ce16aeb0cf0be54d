use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use weft_core::error::Result;
use weft_core::traits::Capability;
use weft_core::types::CapabilityOutcome;

use crate::engine::Workflow;

/// A whole workflow wrapped as a single capability, so one engine can sit
/// behind another as just another invocable action.
///
/// The inner run's final text is the capability result; an inner failure
/// becomes an error outcome for the outer backend to react to, never an
/// outer-run abort.
pub struct WorkflowCapability {
    name: String,
    description: String,
    workflow: Arc<Workflow>,
}

impl WorkflowCapability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        workflow: Arc<Workflow>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            workflow,
        }
    }
}

impl Capability for WorkflowCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The request to run through the inner workflow."
                }
            },
            "required": ["input"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        300
    }

    fn invoke(&self, input: serde_json::Value) -> BoxFuture<'_, Result<CapabilityOutcome>> {
        Box::pin(async move {
            let request = input
                .get("input")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| input.to_string());

            debug!(capability = %self.name, "Running nested workflow");
            match self.workflow.run(request).await {
                Ok(report) => Ok(CapabilityOutcome::success(report.text())),
                Err(e) => Ok(CapabilityOutcome::error(e.to_string())),
            }
        })
    }
}
