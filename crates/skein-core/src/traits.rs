use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client for OpenAI-compatible chat models.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request. Streaming requests may still be answered with a
    /// complete response by providers that do not stream.
    fn complete(
        &self,
        config: &ModelConfig,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<Completion<'_>>>;
}

/// Counts prompt/completion tokens when a provider omits usage.
pub trait TokenCounter: Send + Sync + 'static {
    fn count(&self, messages: &[Message], tools: Option<&[ToolDefinition]>) -> usize;
}

/// Destination for wire frames, typically an HTTP response body.
pub trait EventSink: Send + Sync + 'static {
    /// Write one frame. Returns false when the sink's buffer is full; the
    /// frame is still accepted, but the writer must wait for `drained`.
    fn write(&self, event: Option<&str>, data: &str) -> bool;

    /// Whether the consumer has gone away.
    fn is_closed(&self) -> bool;

    /// Resolves once the sink can take more frames.
    fn drained(&self) -> BoxFuture<'_, ()>;
}
