use serde::{Deserialize, Serialize};

/// Model configuration passed through to the completion backend.
/// The backend itself is an external collaborator; this core only
/// forwards the settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
        }
    }
}

/// Bounded counters for the round-manager strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundLimits {
    /// Maximum participant turns. Exceeding this ends the execution with a
    /// soft `RoundLimitExceeded` result carrying the best-so-far answer.
    #[serde(default = "default_max_rounds")]
    pub max_round_count: usize,
    /// No-progress rounds before a forced reset.
    #[serde(default = "default_max_stalls")]
    pub max_stall_count: usize,
    /// Forced resets before the execution fails with `ResetLimitExceeded`.
    #[serde(default = "default_max_resets")]
    pub max_reset_count: usize,
}

fn default_max_rounds() -> usize {
    20
}
fn default_max_stalls() -> usize {
    3
}
fn default_max_resets() -> usize {
    2
}

impl Default for RoundLimits {
    fn default() -> Self {
        Self {
            max_round_count: default_max_rounds(),
            max_stall_count: default_max_stalls(),
            max_reset_count: default_max_resets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_limits_defaults() {
        let limits = RoundLimits::default();
        assert_eq!(limits.max_round_count, 20);
        assert_eq!(limits.max_stall_count, 3);
        assert_eq!(limits.max_reset_count, 2);
    }

    #[test]
    fn test_round_limits_partial_deserialization() {
        let limits: RoundLimits = serde_json::from_str(r#"{"max_round_count": 6}"#).unwrap();
        assert_eq!(limits.max_round_count, 6);
        assert_eq!(limits.max_stall_count, 3);
    }

    #[test]
    fn test_model_config_defaults() {
        let config: ModelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_tokens, 4096);
    }
}
