use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Node dispatches allowed per top-level run, nested runs included.
    #[serde(default = "default_max_run_times")]
    pub max_run_times: u32,
    /// Model turns a tools node may spend calling tools.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
    /// Characters kept from each end of a tool response in `toolResponse` frames.
    #[serde(default = "default_tool_response_preview")]
    pub tool_response_preview: usize,
    /// Emit node status, tool and flow response frames.
    #[serde(default = "default_detail")]
    pub detail: bool,
    /// Tokens held back from the context window for the reply.
    #[serde(default = "default_context_reserve")]
    pub context_reserve: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_run_times: default_max_run_times(),
            max_tool_iterations: default_max_tool_iterations(),
            max_nesting_depth: default_max_nesting_depth(),
            tool_response_preview: default_tool_response_preview(),
            detail: default_detail(),
            context_reserve: default_context_reserve(),
        }
    }
}

fn default_max_run_times() -> u32 { 500 }
fn default_max_tool_iterations() -> usize { 30 }
fn default_max_nesting_depth() -> usize { 20 }
fn default_tool_response_preview() -> usize { 500 }
fn default_detail() -> bool { true }
fn default_context_reserve() -> usize { 300 }

/// Which tool-calling protocol a model speaks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolProtocolKind {
    #[default]
    ToolChoice,
    FunctionCall,
    PromptCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Identifier used by graph templates and sent to the provider.
    pub id: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_context")]
    pub max_context: usize,
    #[serde(default = "default_max_response")]
    pub max_response: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub tool_protocol: ToolProtocolKind,
    /// Points per 1000 prompt tokens.
    #[serde(default)]
    pub input_price: f64,
    /// Points per 1000 completion tokens.
    #[serde(default)]
    pub output_price: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Prepended to every system prompt sent to this model.
    #[serde(default)]
    pub default_system_prompt: Option<String>,
    /// Extra HTTP headers sent with each request.
    #[serde(default)]
    pub extra_headers: std::collections::HashMap<String, String>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: default_provider(),
            api_key: None,
            base_url: None,
            max_context: default_max_context(),
            max_response: default_max_response(),
            temperature: default_temperature(),
            tool_protocol: ToolProtocolKind::default(),
            input_price: 0.0,
            output_price: 0.0,
            request_timeout_secs: default_request_timeout(),
            default_system_prompt: None,
            extra_headers: Default::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: ToolProtocolKind) -> Self {
        self.tool_protocol = protocol;
        self
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_context() -> usize { 16_000 }
fn default_max_response() -> u32 { 4_000 }
fn default_temperature() -> f32 { 0.0 }
fn default_request_timeout() -> u64 { 600 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SkeinError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| SkeinError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(SkeinError::Config(format!(
                    "duplicate model id: {}",
                    model.id
                )));
            }
        }
        if self.engine.max_run_times == 0 {
            return Err(SkeinError::Config("engine.max_run_times must be > 0".into()));
        }
        Ok(())
    }

    pub fn model(&self, id: &str) -> Result<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| SkeinError::ModelNotFound(id.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns; unset variables are kept verbatim.
fn expand_env_vars(input: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static env var pattern")
    });
    pattern
        .replace_all(input, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
