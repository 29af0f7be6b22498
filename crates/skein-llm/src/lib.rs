pub mod providers;
pub mod retry;
pub mod streaming;
pub mod tokens;

use skein_core::config::{EngineConfig, ModelConfig};
use skein_core::error::{Result, SkeinError};

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use tokens::TiktokenCounter;

const OPENAI_COMPATIBLE: &[&str] = &[
    "openai", "ollama", "groq", "openrouter", "together", "mistral", "deepseek",
];

/// Create the retrying client shared by every model in the config.
///
/// Fails if a model names a provider that does not speak the OpenAI wire
/// format and has no explicit `base_url`.
pub fn create_client(config: &EngineConfig) -> Result<RetryingClient> {
    for model in &config.models {
        check_provider(model)?;
    }
    Ok(RetryingClient::new(
        Box::new(OpenAiClient::new()),
        config.retry.clone(),
    ))
}

fn check_provider(model: &ModelConfig) -> Result<()> {
    if OPENAI_COMPATIBLE.contains(&model.provider.as_str()) || model.base_url.is_some() {
        Ok(())
    } else {
        Err(SkeinError::UnsupportedProvider(model.provider.clone()))
    }
}
