use serde_json::{json, Value};

/// Kinds of frames a run writes to its event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SseEventKind {
    Answer,
    FastAnswer,
    FlowNodeStatus,
    ToolCall,
    ToolParams,
    ToolResponse,
    FlowResponses,
    Interactive,
    UpdateVariables,
    Error,
}

impl SseEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::FastAnswer => "fastAnswer",
            Self::FlowNodeStatus => "flowNodeStatus",
            Self::ToolCall => "toolCall",
            Self::ToolParams => "toolParams",
            Self::ToolResponse => "toolResponse",
            Self::FlowResponses => "flowResponses",
            Self::Interactive => "interactive",
            Self::UpdateVariables => "updateVariables",
            Self::Error => "error",
        }
    }

    /// Frames only written when detail streaming is on.
    pub fn is_detail_only(&self) -> bool {
        !matches!(
            self,
            Self::Answer | Self::FastAnswer | Self::Interactive | Self::Error
        )
    }
}

impl std::fmt::Display for SseEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event before it is framed for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub kind: SseEventKind,
    pub data: Value,
}

impl SseEvent {
    pub fn new(kind: SseEventKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// An answer text chunk in the `chat.completion.chunk` shape.
    pub fn answer(text: impl Into<String>) -> Self {
        Self::new(
            SseEventKind::Answer,
            completion_chunk(json!({"role": "assistant", "content": text.into()}), Value::Null),
        )
    }

    /// Closing answer chunk carrying `finish_reason: stop`.
    pub fn answer_finish() -> Self {
        Self::new(
            SseEventKind::Answer,
            completion_chunk(json!({}), Value::String("stop".into())),
        )
    }

    pub fn node_status(name: &str) -> Self {
        Self::new(
            SseEventKind::FlowNodeStatus,
            json!({"status": "running", "name": name}),
        )
    }

    pub fn tool_call(call_id: &str, tool_name: &str, function_name: &str) -> Self {
        Self::new(
            SseEventKind::ToolCall,
            json!({"tool": {
                "id": call_id,
                "toolName": tool_name,
                "functionName": function_name,
                "params": "",
                "response": "",
            }}),
        )
    }

    pub fn tool_params(call_id: &str, delta: &str) -> Self {
        Self::new(
            SseEventKind::ToolParams,
            json!({"tool": {
                "id": call_id,
                "toolName": "",
                "params": delta,
                "response": "",
            }}),
        )
    }

    pub fn tool_response(call_id: &str, response: &str) -> Self {
        Self::new(
            SseEventKind::ToolResponse,
            json!({"tool": {
                "id": call_id,
                "toolName": "",
                "params": "",
                "response": response,
            }}),
        )
    }

    pub fn interactive(prompt: Value) -> Self {
        Self::new(SseEventKind::Interactive, json!({"interactive": prompt}))
    }

    pub fn flow_responses(responses: Value) -> Self {
        Self::new(SseEventKind::FlowResponses, responses)
    }

    pub fn error(message: &str) -> Self {
        Self::new(SseEventKind::Error, json!({"message": message}))
    }
}

fn completion_chunk(delta: Value, finish_reason: Value) -> Value {
    json!({
        "id": "",
        "object": "chat.completion.chunk",
        "created": 0,
        "model": "",
        "choices": [{"delta": delta, "index": 0, "finish_reason": finish_reason}],
    })
}
