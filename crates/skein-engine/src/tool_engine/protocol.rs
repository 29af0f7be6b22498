use skein_core::config::ToolProtocolKind;
use skein_core::types::{CompletionRequest, Message, ToolCall, ToolDefinition, ToolSchemas};

use super::function_call::FunctionCall;
use super::prompt_call::PromptCall;
use super::tool_choice::ToolChoice;
use super::ToolSpec;

/// What the model produced in one turn, before protocol interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub content: String,
    pub calls: Vec<ToolCall>,
}

/// A model turn interpreted by a protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTurn {
    /// The model answered the user directly.
    Answer(String),
    ToolCalls {
        /// Assistant text kept in the conversation for this turn.
        content: String,
        /// Assistant text shown to the user alongside the calls.
        show_content: String,
        calls: Vec<ToolCall>,
    },
}

/// Streaming filter state for one model turn.
#[derive(Debug, Default)]
pub struct RelayState {
    pub buffer: String,
    /// `Some(true)` once the turn is known to be a plain answer.
    pub decided: Option<bool>,
    /// Some answer text has reached the sink.
    pub forwarded: bool,
}

/// How one family of models is asked to call tools.
pub trait ToolProtocol: Send + Sync {
    fn kind(&self) -> ToolProtocolKind;

    /// Rewrite the conversation once before the first model call.
    fn prepare(&self, _messages: &mut Vec<Message>, _tools: &[ToolSpec]) {}

    /// Tokens held back from the context window on top of the configured
    /// reserve.
    fn extra_reserve(&self) -> usize {
        0
    }

    fn schemas(&self, tools: &[ToolSpec]) -> ToolSchemas;

    fn build_request(&self, messages: Vec<Message>, tools: &[ToolSpec], stream: bool) -> CompletionRequest {
        CompletionRequest {
            messages,
            tools: self.schemas(tools),
            stream,
            temperature: None,
        }
    }

    /// Decide what part of a streamed text chunk reaches the user.
    fn relay(&self, _state: &mut RelayState, chunk: &str) -> Option<String> {
        Some(chunk.to_string())
    }

    fn parse_turn(&self, turn: ModelTurn) -> ParsedTurn;

    /// Add one completed tool round to the conversation sent to the model.
    fn record_round(&self, messages: &mut Vec<Message>, assistant: &Message, responses: &[Message]) {
        messages.push(assistant.clone());
        messages.extend(responses.iter().cloned());
    }

    fn max_calls_per_turn(&self) -> Option<usize> {
        None
    }

    /// Tool calls arrive as structured deltas rather than in the text.
    fn structured(&self) -> bool {
        true
    }
}

pub fn for_kind(kind: ToolProtocolKind) -> Box<dyn ToolProtocol> {
    match kind {
        ToolProtocolKind::ToolChoice => Box::new(ToolChoice),
        ToolProtocolKind::FunctionCall => Box::new(FunctionCall),
        ToolProtocolKind::PromptCall => Box::new(PromptCall),
    }
}

/// Structured turns: calls if any, else the text is the answer.
pub(crate) fn parse_structured(turn: ModelTurn) -> ParsedTurn {
    if turn.calls.is_empty() {
        ParsedTurn::Answer(turn.content)
    } else {
        ParsedTurn::ToolCalls {
            show_content: turn.content.clone(),
            content: turn.content,
            calls: turn.calls,
        }
    }
}

pub(crate) fn definitions(tools: &[ToolSpec]) -> Vec<ToolDefinition> {
    tools.iter().map(ToolSpec::definition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_adapter_by_kind() {
        for kind in [
            ToolProtocolKind::ToolChoice,
            ToolProtocolKind::FunctionCall,
            ToolProtocolKind::PromptCall,
        ] {
            assert_eq!(for_kind(kind).kind(), kind);
        }
    }

    #[test]
    fn structured_turn_without_calls_is_answer() {
        let parsed = parse_structured(ModelTurn {
            content: "hi".into(),
            calls: vec![],
        });
        assert_eq!(parsed, ParsedTurn::Answer("hi".into()));
    }
}
