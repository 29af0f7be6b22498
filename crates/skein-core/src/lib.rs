pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod suspension;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, EngineSettings, ModelConfig, RetryConfig, ToolProtocolKind};
pub use error::{Result, SkeinError};
pub use event::{SseEvent, SseEventKind};
pub use suspension::{InteractivePrompt, InteractiveSuspension, ToolCheckpoint};
pub use types::*;
