use skein_core::config::ToolProtocolKind;
use skein_core::types::ToolSchemas;

use super::protocol::{definitions, parse_structured, ModelTurn, ParsedTurn, ToolProtocol};
use super::ToolSpec;

/// `tools` + `tool_choice: auto`; any number of calls per turn.
pub struct ToolChoice;

impl ToolProtocol for ToolChoice {
    fn kind(&self) -> ToolProtocolKind {
        ToolProtocolKind::ToolChoice
    }

    fn schemas(&self, tools: &[ToolSpec]) -> ToolSchemas {
        ToolSchemas::Tools(definitions(tools))
    }

    fn parse_turn(&self, turn: ModelTurn) -> ParsedTurn {
        parse_structured(turn)
    }
}
