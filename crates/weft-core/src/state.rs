use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared run state handle. Capabilities that write state capture a clone
/// of this at construction time; only the currently active node's turn
/// holds the lock, so writes never interleave.
pub type SharedRunState = Arc<tokio::sync::Mutex<RunState>>;

/// Key/value scope alive for one workflow execution.
///
/// Created empty at execution start, mutated by the active node during its
/// turn, discarded when the execution terminates. A key, once written,
/// retains its last value until execution end.
///
/// Values live in two partitions: durable `data`, and `scratch` which a
/// round-manager reset clears while leaving the conversation thread intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    data: HashMap<String, serde_json::Value>,
    scratch: HashMap<String, serde_json::Value>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a durable value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a durable value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Set a durable value.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Set a durable string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Get a scratch value by key.
    pub fn get_scratch(&self, key: &str) -> Option<&serde_json::Value> {
        self.scratch.get(key)
    }

    /// Set a scratch value. Scratch entries are cleared by a forced reset.
    pub fn set_scratch(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.scratch.insert(key.into(), value);
    }

    /// Clear the scratch partition. Durable data is untouched.
    pub fn clear_scratch(&mut self) {
        self.scratch.clear();
    }

    /// Extract output values for the given keys from a node's output text.
    ///
    /// If the output parses as a JSON object, matching keys are extracted;
    /// otherwise the full text is stored under each key.
    pub fn ingest_output(&mut self, output_keys: &[String], output_text: &str) {
        if output_keys.is_empty() {
            return;
        }

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(output_text) {
            if let Some(obj) = json.as_object() {
                for key in output_keys {
                    if let Some(val) = obj.get(key) {
                        self.data.insert(key.clone(), val.clone());
                    }
                }
                return;
            }
        }

        for key in output_keys {
            self.data.insert(
                key.clone(),
                serde_json::Value::String(output_text.to_string()),
            );
        }
    }

    /// The underlying durable data map.
    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.scratch.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut state = RunState::new();
        state.set_str("customer", "Alice");
        state.set("total", serde_json::json!(129.99));

        assert_eq!(state.get_str("customer"), Some("Alice"));
        assert_eq!(state.get("total"), Some(&serde_json::json!(129.99)));
        assert_eq!(state.get("missing"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let mut state = RunState::new();
        state.set_str("k", "first");
        state.set_str("k", "second");
        assert_eq!(state.get_str("k"), Some("second"));
    }

    #[test]
    fn test_scratch_cleared_independently() {
        let mut state = RunState::new();
        state.set_str("durable", "kept");
        state.set_scratch("working", serde_json::json!("draft"));

        state.clear_scratch();

        assert_eq!(state.get_scratch("working"), None);
        assert_eq!(state.get_str("durable"), Some("kept"));
    }

    #[test]
    fn test_ingest_json_output() {
        let mut state = RunState::new();
        state.ingest_output(
            &["forecast".into()],
            r#"{"forecast": "sunny", "temp": 21}"#,
        );
        assert_eq!(state.get_str("forecast"), Some("sunny"));
        assert_eq!(state.get("temp"), None);
    }

    #[test]
    fn test_ingest_plain_text_output() {
        let mut state = RunState::new();
        state.ingest_output(&["summary".into()], "plain result");
        assert_eq!(state.get_str("summary"), Some("plain result"));
    }
}
