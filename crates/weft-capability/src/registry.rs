use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::traits::Capability;
use weft_core::types::{CapabilityDefinition, CapabilityOutcome};

/// Registry of capabilities available to agent nodes.
///
/// Discovery (`definitions`) is static: the set and schemas are fixed when
/// the registry is handed to a workflow. `close_all` releases every
/// capability's connection-scoped resources and is called by the engine on
/// every exit path.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Register a capability.
    pub fn register(&mut self, capability: impl Capability) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    /// Unregister a capability by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.capabilities.remove(name).is_some()
    }

    /// Get a capability by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// List all registered capability names.
    pub fn list(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    /// Whether a capability is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Definitions for sending to the completion backend.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        self.capabilities.values().map(|c| c.definition()).collect()
    }

    /// Invoke a capability by name, bounded by its declared timeout.
    pub async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<CapabilityOutcome> {
        let capability = self
            .get(name)
            .ok_or_else(|| WeftError::CapabilityNotFound(name.to_string()))?;

        debug!(capability = %name, "Invoking capability");

        let timeout = std::time::Duration::from_secs(capability.timeout_secs());
        match tokio::time::timeout(timeout, capability.invoke(input)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::CapabilityTimeout {
                name: name.to_string(),
                timeout_secs: capability.timeout_secs(),
            }),
        }
    }

    /// Release connection-scoped resources held by every capability.
    /// Failures are logged, not propagated: release must not mask the
    /// execution's own result.
    pub async fn close_all(&self) {
        for (name, capability) in &self.capabilities {
            if let Err(e) = capability.close().await {
                warn!(capability = %name, error = %e, "Capability close failed");
            }
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::FnCapability;

    fn echo_capability() -> FnCapability {
        FnCapability::new(
            "echo",
            "Echo the input back.",
            serde_json::json!({"type": "object"}),
            |input| async move { Ok(CapabilityOutcome::success(input.to_string())) },
        )
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo_capability());

        assert!(registry.contains("echo"));
        let outcome = registry
            .invoke("echo", serde_json::json!({"k": 1}))
            .await
            .unwrap();
        assert!(!outcome.is_error);
        assert!(outcome.content.contains("\"k\":1"));
    }

    #[tokio::test]
    async fn test_invoke_unknown() {
        let registry = CapabilityRegistry::new();
        let result = registry.invoke("missing", serde_json::json!({})).await;
        assert!(matches!(result, Err(WeftError::CapabilityNotFound(_))));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            FnCapability::new(
                "slow",
                "Never finishes in time.",
                serde_json::json!({"type": "object"}),
                |_| async move {
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    Ok(CapabilityOutcome::success("late"))
                },
            )
            .with_timeout(0),
        );

        let result = registry.invoke("slow", serde_json::json!({})).await;
        assert!(matches!(result, Err(WeftError::CapabilityTimeout { .. })));
    }

    #[test]
    fn test_definitions() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo_capability());

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert!(!defs[0].description.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_is_infallible() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo_capability());
        registry.close_all().await;
    }
}
