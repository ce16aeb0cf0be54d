use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Capability;
use weft_core::types::CapabilityOutcome;

/// A remote request/response capability.
///
/// Arguments are POSTed as JSON to the endpoint; the response body is the
/// result. Transport failures surface as a typed `Capability` error, never
/// a crash.
pub struct HttpCapability {
    name: String,
    description: String,
    schema: serde_json::Value,
    endpoint: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

/// Schema document served by a remote capability endpoint.
#[derive(Deserialize)]
struct RemoteSchema {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_schema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

impl HttpCapability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        endpoint: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WeftError::Config(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            name: name.into(),
            description: description.into(),
            schema,
            endpoint: endpoint.into(),
            client,
            timeout_secs: 60,
        })
    }

    /// Discover a remote capability by fetching `{endpoint}/schema`.
    ///
    /// Discovery happens once, when the node that uses this capability is
    /// constructed. A failure here is fatal and is not retried mid-execution.
    pub async fn discover(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WeftError::Config(format!("HTTP client build failed: {e}")))?;

        let schema: RemoteSchema = client
            .get(format!("{endpoint}/schema"))
            .send()
            .await
            .map_err(|e| WeftError::Config(format!("capability discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| WeftError::Config(format!("capability schema parse failed: {e}")))?;

        debug!(name = %schema.name, endpoint = %endpoint, "Discovered remote capability");

        Ok(Self {
            name: schema.name,
            description: schema.description,
            schema: schema.input_schema,
            endpoint,
            client,
            timeout_secs: 60,
        })
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Capability for HttpCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn invoke(&self, input: serde_json::Value) -> BoxFuture<'_, Result<CapabilityOutcome>> {
        Box::pin(async move {
            debug!(capability = %self.name, endpoint = %self.endpoint, "Calling remote capability");

            let response = self
                .client
                .post(&self.endpoint)
                .json(&input)
                .send()
                .await
                .map_err(|e| WeftError::Capability {
                    name: self.name.clone(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.is_success() {
                Ok(CapabilityOutcome::success(body))
            } else {
                Ok(CapabilityOutcome::error(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction() {
        let cap = HttpCapability::new(
            "get_tracking_info",
            "Get shipping tracking information.",
            serde_json::json!({
                "type": "object",
                "properties": { "tracking_number": { "type": "string" } }
            }),
            "http://localhost:9999/tools/tracking",
        )
        .unwrap();

        assert_eq!(cap.name(), "get_tracking_info");
        assert_eq!(cap.timeout_secs(), 60);
    }

    #[tokio::test]
    async fn test_invoke_unreachable_is_typed_error() {
        // Port 9 (discard) is not listening; the failure must be a typed
        // Capability error, never a panic.
        let cap = HttpCapability::new(
            "unreachable",
            "Always fails.",
            serde_json::json!({"type": "object"}),
            "http://127.0.0.1:9/none",
        )
        .unwrap();

        let result = cap.invoke(serde_json::json!({})).await;
        assert!(matches!(result, Err(WeftError::Capability { .. })));
    }
}
