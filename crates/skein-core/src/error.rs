use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Model not configured: {0}")]
    ModelNotFound(String),

    // Graph errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("No handler registered for node kind: {0}")]
    MissingHandler(String),

    #[error("Node execution failed: {node}: {message}")]
    NodeExecution { node: String, message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkeinError {
    /// Whether the error comes from the graph or model configuration rather
    /// than from a provider or a node at run time.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound(_)
                | Self::ModelNotFound(_)
                | Self::InvalidGraph(_)
                | Self::UnknownNode(_)
                | Self::MissingHandler(_)
                | Self::UnsupportedProvider(_)
        )
    }

    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::LlmRequest(_) | Self::LlmStream(_) | Self::LlmParse(_)
        )
    }

    /// Text shown to the end user. Provider failures are reported verbatim
    /// only when the user runs with their own provider key.
    pub fn user_message(&self, external_key: bool) -> String {
        if self.is_provider() && !external_key {
            return "The model service is temporarily unavailable, please try again later"
                .to_string();
        }
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, SkeinError>;
