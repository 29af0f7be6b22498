use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model. `arguments` is the raw JSON
/// text exactly as the model produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// A chat message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn assistant_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, text)
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token usage reported by a provider for one model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One increment of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    TextDelta(String),
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolArgsDelta {
        index: usize,
        delta: String,
    },
    Usage(Usage),
    Stop(StopReason),
}

/// Tool definition sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: serde_json::Value,
}

/// How tool schemas travel with a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolSchemas {
    /// No structured schemas (plain chat, or schemas embedded in the prompt).
    #[default]
    None,
    /// `tools` + `tool_choice: auto`.
    Tools(Vec<ToolDefinition>),
    /// Legacy `functions` + `function_call: auto`.
    Functions(Vec<ToolDefinition>),
}

impl ToolSchemas {
    pub fn definitions(&self) -> Option<&[ToolDefinition]> {
        match self {
            Self::None => None,
            Self::Tools(defs) | Self::Functions(defs) => Some(defs),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: ToolSchemas,
    pub stream: bool,
    /// Overrides the model's configured temperature.
    pub temperature: Option<f32>,
}

/// A fully materialized model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// Result of a model call. Dropping a `Stream` aborts the underlying request.
pub enum Completion<'a> {
    Complete(CompleteResponse),
    Stream(BoxStream<'a, Result<StreamDelta>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_carries_call_metadata() {
        let msg = Message::tool("call_1", "getTime", "12:00");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("getTime"));
    }

    #[test]
    fn message_serde_skips_empty_metadata() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, Message::user("hi"));
    }

    #[test]
    fn schemas_expose_definitions() {
        let def = ToolDefinition {
            name: "t".into(),
            description: "d".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        assert!(ToolSchemas::None.definitions().is_none());
        assert_eq!(ToolSchemas::Functions(vec![def]).definitions().unwrap().len(), 1);
    }
}
