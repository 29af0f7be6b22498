//! Tool calling for models without a structured tool API.
//!
//! Tool schemas are written into the last user message and the model is
//! told to prefix its reply with `0:` for a direct answer or
//! `1: {"toolId": ..., "arguments": {...}}` for a tool call. Tool results are
//! spliced back into that same user message, so the model always sees one
//! growing prompt.

use serde_json::{json, Value};
use uuid::Uuid;

use skein_core::config::ToolProtocolKind;
use skein_core::types::{Message, Role, ToolCall, ToolSchemas};

use super::protocol::{ModelTurn, ParsedTurn, RelayState, ToolProtocol};
use super::ToolSpec;

/// Answer surfaced when the model announces a call but the JSON is unusable.
pub const TOOL_RUN_ERROR: &str = "Tool run error";

const PROMPT_TEMPLATE: &str = r#"You can use the tools below to answer the user's question.

## Tools
"""
{{toolsPrompt}}
"""

## Reply format
- To answer directly, reply with "0:" followed by the answer.
- To call a tool, reply with "1:" followed by a JSON object: {"toolId": "<tool id>", "arguments": {<parameters>}}
- Call at most one tool per reply and do not explain the call.

## Example
USER: What time is it in Hangzhou?
ANSWER: 1: {"toolId": "getTime", "arguments": {"city": "Hangzhou"}}
TOOL_RESPONSE: """
2024-05-05 12:00
"""
ANSWER: 0: It's 12:00 in Hangzhou.

USER: {{question}}
ANSWER: "#;

pub struct PromptCall;

impl PromptCall {
    fn tools_prompt(tools: &[ToolSpec]) -> String {
        tools
            .iter()
            .map(|tool| {
                let properties: serde_json::Map<String, Value> = tool
                    .params
                    .iter()
                    .map(|p| {
                        (
                            p.key.clone(),
                            json!({"type": "string", "description": p.description}),
                        )
                    })
                    .collect();
                json!({
                    "toolId": tool.node_id,
                    "description": tool.intro,
                    "parameters": {
                        "type": "object",
                        "properties": properties,
                        "required": tool.required_keys(),
                    },
                })
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ToolProtocol for PromptCall {
    fn kind(&self) -> ToolProtocolKind {
        ToolProtocolKind::PromptCall
    }

    fn prepare(&self, messages: &mut Vec<Message>, tools: &[ToolSpec]) {
        let Some(last) = messages.iter_mut().rev().find(|m| m.role == Role::User) else {
            return;
        };
        last.content = PROMPT_TEMPLATE
            .replace("{{toolsPrompt}}", &Self::tools_prompt(tools))
            .replace("{{question}}", &last.content);
    }

    fn extra_reserve(&self) -> usize {
        200
    }

    fn schemas(&self, _tools: &[ToolSpec]) -> ToolSchemas {
        ToolSchemas::None
    }

    fn relay(&self, state: &mut RelayState, chunk: &str) -> Option<String> {
        match state.decided {
            Some(false) => return None,
            Some(true) => return forward(state, chunk),
            None => {}
        }

        state.buffer.push_str(chunk);
        if state.buffer.chars().count() < 3 {
            return None;
        }
        let buffered = state.buffer.trim_start().to_string();
        match strip_answer_prefix(&buffered) {
            Some(rest) => {
                state.decided = Some(true);
                forward(state, rest)
            }
            None => {
                state.decided = Some(false);
                None
            }
        }
    }

    fn parse_turn(&self, turn: ModelTurn) -> ParsedTurn {
        parse_reply(&turn.content)
    }

    fn record_round(&self, messages: &mut Vec<Message>, assistant: &Message, responses: &[Message]) {
        let Some(last) = messages.iter_mut().rev().find(|m| m.role == Role::User) else {
            return;
        };
        let response = responses.first().map(|m| m.content.as_str()).unwrap_or("none");
        last.content.push_str(&format!(
            "{}\nTOOL_RESPONSE: \"\"\"\n{}\n\"\"\"\nANSWER: ",
            assistant.content, response
        ));
    }

    fn max_calls_per_turn(&self) -> Option<usize> {
        Some(1)
    }

    fn structured(&self) -> bool {
        false
    }
}

/// Forward answer text once leading whitespace has passed.
fn forward(state: &mut RelayState, text: &str) -> Option<String> {
    let text = if state.forwarded { text } else { text.trim_start() };
    if text.is_empty() {
        return None;
    }
    state.forwarded = true;
    Some(text.to_string())
}

/// Text after a `0:` prefix; models writing CJK often use a full-width colon.
fn strip_answer_prefix(text: &str) -> Option<&str> {
    text.strip_prefix("0:").or_else(|| text.strip_prefix("0："))
}

/// Interpret a reply in the `0:` / `1:` grammar.
pub fn parse_reply(content: &str) -> ParsedTurn {
    let text = content.trim();
    if let Some(rest) = strip_answer_prefix(text) {
        return ParsedTurn::Answer(rest.trim().to_string());
    }
    let Some(rest) = text.strip_prefix("1:").or_else(|| text.strip_prefix("1：")) else {
        return ParsedTurn::Answer(text.to_string());
    };

    match parse_call(rest) {
        Some(call) => ParsedTurn::ToolCalls {
            content: text.to_string(),
            show_content: String::new(),
            calls: vec![call],
        },
        None => ParsedTurn::Answer(TOOL_RUN_ERROR.to_string()),
    }
}

fn parse_call(text: &str) -> Option<ToolCall> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = json5::from_str(&text[start..=end]).ok()?;
    let tool_id = value.get("toolId")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))
        .map(Value::to_string)
        .unwrap_or_else(|| "{}".to_string());
    Some(ToolCall {
        id: Uuid::new_v4().simple().to_string(),
        name: tool_id,
        arguments,
    })
}
