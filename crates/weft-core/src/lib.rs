pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod thread;
pub mod traits;
pub mod types;

pub use config::{ModelConfig, RoundLimits};
pub use error::{Result, WeftError};
pub use event::EventBus;
pub use state::{RunState, SharedRunState};
pub use thread::Thread;
pub use types::*;
