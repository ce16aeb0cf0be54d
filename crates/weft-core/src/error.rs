use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Message errors
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // Capability errors
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Capability failed: {name}: {message}")]
    Capability { name: String, message: String },

    #[error("Capability timeout after {timeout_secs}s: {name}")]
    CapabilityTimeout { name: String, timeout_secs: u64 },

    #[error("Agent node '{node}' exceeded {rounds} capability round-trips")]
    CapabilityLoopExceeded { node: String, rounds: usize },

    // Routing errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Illegal transfer from '{from}' to '{to}': target not in permitted set")]
    IllegalTransfer { from: String, to: String },

    // Function node errors
    #[error("Function node '{node}' failed: {message}")]
    Function { node: String, message: String },

    #[error("Function node '{node}' failed fatally: {message}")]
    FunctionFatal { node: String, message: String },

    // Round manager errors
    #[error("Round manager exceeded {resets} resets")]
    ResetLimitExceeded { resets: usize },

    // Engine errors
    #[error("Execution cancelled")]
    Cancelled,

    #[error("Completion backend error: {0}")]
    Backend(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WeftError {
    /// A recoverable function-node error. The execution still aborts unless
    /// the strategy declares a fallback edge for the failing node.
    pub fn function(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            node: node.into(),
            message: message.into(),
        }
    }

    /// A fatal function-node error. Always aborts the execution.
    pub fn function_fatal(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FunctionFatal {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Whether a strategy-level fallback edge may absorb this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Function { .. })
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
