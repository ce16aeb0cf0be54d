use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::error::Result;
use weft_core::traits::Capability;
use weft_core::types::CapabilityOutcome;

type Handler =
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<CapabilityOutcome>> + Send + Sync;

/// A local deterministic function exposed as a capability.
///
/// The handler may capture a `SharedRunState` clone to write state; that is
/// an ordinary side effect of the capability, not hidden in the backend call.
pub struct FnCapability {
    name: String,
    description: String,
    schema: serde_json::Value,
    handler: Arc<Handler>,
    timeout_secs: u64,
}

impl FnCapability {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CapabilityOutcome>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(move |input| Box::pin(handler(input))),
            timeout_secs: 30,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn invoke(&self, input: serde_json::Value) -> BoxFuture<'_, Result<CapabilityOutcome>> {
        (self.handler)(input)
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::state::SharedRunState;

    #[tokio::test]
    async fn test_invoke() {
        let cap = FnCapability::new(
            "lookup_order",
            "Look up order details by order ID.",
            serde_json::json!({
                "type": "object",
                "properties": { "order_id": { "type": "string" } },
                "required": ["order_id"]
            }),
            |input| async move {
                let id = input["order_id"].as_str().unwrap_or("?").to_string();
                Ok(CapabilityOutcome::success(format!("Order {id}: shipped")))
            },
        );

        assert_eq!(cap.name(), "lookup_order");
        let outcome = cap
            .invoke(serde_json::json!({"order_id": "ORD-1"}))
            .await
            .unwrap();
        assert_eq!(outcome.content, "Order ORD-1: shipped");
    }

    #[tokio::test]
    async fn test_state_writing_capability() {
        let state: SharedRunState = SharedRunState::default();
        let handle = state.clone();

        let cap = FnCapability::new(
            "remember_name",
            "Store the customer's name.",
            serde_json::json!({"type": "object"}),
            move |input| {
                let handle = handle.clone();
                async move {
                    let name = input["name"].as_str().unwrap_or("").to_string();
                    handle.lock().await.set_str("customer_name", &name);
                    Ok(CapabilityOutcome::success("stored"))
                }
            },
        );

        cap.invoke(serde_json::json!({"name": "Alice"}))
            .await
            .unwrap();
        assert_eq!(state.lock().await.get_str("customer_name"), Some("Alice"));
    }
}
