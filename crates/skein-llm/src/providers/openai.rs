use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skein_core::config::ModelConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::LlmClient;
use skein_core::types::*;

use crate::streaming::{SseFrame, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Speaks both `tools` and the legacy `functions`
/// request shapes, streaming or not.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat completions endpoint for well-known OpenAI-compatible providers.
pub fn default_endpoint(provider: &str) -> &'static str {
    match provider {
        "ollama" => "http://localhost:11434/v1/chat/completions",
        "groq" => "https://api.groq.com/openai/v1/chat/completions",
        "openrouter" => "https://openrouter.ai/api/v1/chat/completions",
        "together" => "https://api.together.xyz/v1/chat/completions",
        "mistral" => "https://api.mistral.ai/v1/chat/completions",
        "deepseek" => "https://api.deepseek.com/v1/chat/completions",
        _ => OPENAI_API_URL,
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    functions: Vec<OaiToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<&'static str>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<OaiFunction>,
}

impl OaiMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            function_call: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<OaiFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize, Clone)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(default)]
    function_call: Option<OaiFunction>,
}

#[derive(Deserialize, Debug)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<OaiUsage> for Usage {
    fn from(u: OaiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    #[serde(default)]
    message: ResponseMessage,
}

fn convert_tools(defs: &[ToolDefinition]) -> Vec<OaiToolDef> {
    defs.iter()
        .map(|t| OaiToolDef {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        })
        .collect()
}

/// Map messages to the wire shape. With `legacy_functions` assistant tool
/// calls become a single `function_call` and tool results become `function`
/// messages.
pub(crate) fn convert_messages(messages: Vec<Message>, legacy_functions: bool) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| match msg.role {
            Role::System => OaiMessage::text("system", msg.content),
            Role::User => OaiMessage::text("user", msg.content),
            Role::Assistant if msg.tool_calls.is_empty() => {
                OaiMessage::text("assistant", msg.content)
            }
            Role::Assistant if legacy_functions => {
                let call = msg.tool_calls.into_iter().next();
                OaiMessage {
                    content: Some(msg.content),
                    function_call: call.map(|c| OaiFunction {
                        name: Some(c.name),
                        arguments: Some(c.arguments),
                    }),
                    ..OaiMessage::text("assistant", "")
                }
            }
            Role::Assistant => {
                let calls = msg
                    .tool_calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| OaiToolCall {
                        index: i,
                        id: Some(c.id),
                        r#type: Some("function".to_string()),
                        function: Some(OaiFunction {
                            name: Some(c.name),
                            arguments: Some(c.arguments),
                        }),
                    })
                    .collect();
                OaiMessage {
                    content: (!msg.content.is_empty()).then_some(msg.content),
                    tool_calls: Some(calls),
                    ..OaiMessage::text("assistant", "")
                }
            }
            Role::Tool if legacy_functions => OaiMessage {
                name: msg.name,
                ..OaiMessage::text("function", msg.content)
            },
            Role::Tool => OaiMessage {
                tool_call_id: msg.tool_call_id,
                ..OaiMessage::text("tool", msg.content)
            },
        })
        .collect()
}

fn function_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn parse_chunk(frame: SseFrame) -> Vec<Result<StreamDelta>> {
    if frame.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&frame.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %frame.data, error = %e, "Failed to parse OpenAI SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();
    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage(usage.into())));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return deltas;
    };
    let delta = choice.delta.unwrap_or_default();

    if let Some(text) = delta.content {
        if !text.is_empty() {
            deltas.push(Ok(StreamDelta::TextDelta(text)));
        }
    }

    // Some providers send name and arguments in the same chunk.
    for tc in delta.tool_calls.unwrap_or_default() {
        if let Some(func) = tc.function {
            if let Some(name) = func.name {
                deltas.push(Ok(StreamDelta::ToolCallStart {
                    index: tc.index,
                    id: tc.id.unwrap_or_else(function_call_id),
                    name,
                }));
            }
            if let Some(args) = func.arguments {
                deltas.push(Ok(StreamDelta::ToolArgsDelta {
                    index: tc.index,
                    delta: args,
                }));
            }
        }
    }

    if let Some(func) = delta.function_call {
        if let Some(name) = func.name {
            deltas.push(Ok(StreamDelta::ToolCallStart {
                index: 0,
                id: function_call_id(),
                name,
            }));
        }
        if let Some(args) = func.arguments {
            deltas.push(Ok(StreamDelta::ToolArgsDelta { index: 0, delta: args }));
        }
    }

    if let Some(reason) = choice.finish_reason {
        let stop = match reason.as_str() {
            "tool_calls" | "function_call" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        deltas.push(Ok(StreamDelta::Stop(stop)));
    }

    deltas
}

fn parse_response(body: ChatResponse) -> CompleteResponse {
    let usage = body.usage.map(Usage::from);
    let Some(choice) = body.choices.into_iter().next() else {
        return CompleteResponse {
            usage,
            ..Default::default()
        };
    };
    let message = choice.message;

    let mut tool_calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let func = tc.function?;
            Some(ToolCall {
                id: tc.id.unwrap_or_else(function_call_id),
                name: func.name?,
                arguments: func.arguments.unwrap_or_default(),
            })
        })
        .collect();

    if let Some(func) = message.function_call {
        if let Some(name) = func.name {
            tool_calls.push(ToolCall {
                id: function_call_id(),
                name,
                arguments: func.arguments.unwrap_or_default(),
            });
        }
    }

    CompleteResponse {
        content: message.content.unwrap_or_default(),
        tool_calls,
        usage,
    }
}

fn build_body(config: &ModelConfig, request: CompletionRequest) -> ChatRequest {
    let legacy_functions = matches!(request.tools, ToolSchemas::Functions(_));
    let (tools, functions) = match &request.tools {
        ToolSchemas::None => (Vec::new(), Vec::new()),
        ToolSchemas::Tools(defs) => (
            convert_tools(defs)
                .into_iter()
                .map(|function| OaiTool {
                    r#type: "function",
                    function,
                })
                .collect(),
            Vec::new(),
        ),
        ToolSchemas::Functions(defs) => (Vec::new(), convert_tools(defs)),
    };

    ChatRequest {
        model: config.id.clone(),
        messages: convert_messages(request.messages, legacy_functions),
        max_tokens: config.max_response,
        temperature: request.temperature.unwrap_or(config.temperature),
        stream: request.stream,
        stream_options: request.stream.then_some(StreamOptions { include_usage: true }),
        tool_choice: (!tools.is_empty()).then_some("auto"),
        function_call: (!functions.is_empty()).then_some("auto"),
        tools,
        functions,
    }
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        config: &ModelConfig,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<Completion<'_>>> {
        let config = config.clone();

        Box::pin(async move {
            let url = config
                .base_url
                .clone()
                .unwrap_or_else(|| default_endpoint(&config.provider).to_string());
            let stream = request.stream;
            let body = build_body(&config, request);

            let mut req = self
                .http
                .post(&url)
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            debug!(model = %config.id, url = %url, stream, "Sending chat completion request");
            let response = req
                .send()
                .await
                .map_err(|e| SkeinError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(SkeinError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            if !stream {
                let body: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| SkeinError::LlmParse(e.to_string()))?;
                return Ok(Completion::Complete(parse_response(body)));
            }

            let delta_stream = SseStream::new(response.bytes_stream())
                .map(|frame| match frame {
                    Ok(frame) => futures::stream::iter(parse_chunk(frame)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Completion::Stream(
                Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>
            ))
        })
    }
}
