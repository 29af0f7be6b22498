use skein_core::config::ToolProtocolKind;
use skein_core::types::ToolSchemas;

use super::protocol::{definitions, parse_structured, ModelTurn, ParsedTurn, ToolProtocol};
use super::ToolSpec;

/// Legacy `functions` + `function_call: auto`; one call per turn.
pub struct FunctionCall;

impl ToolProtocol for FunctionCall {
    fn kind(&self) -> ToolProtocolKind {
        ToolProtocolKind::FunctionCall
    }

    fn schemas(&self, tools: &[ToolSpec]) -> ToolSchemas {
        ToolSchemas::Functions(definitions(tools))
    }

    fn parse_turn(&self, turn: ModelTurn) -> ParsedTurn {
        parse_structured(turn)
    }

    fn max_calls_per_turn(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_engine::testing_spec;

    #[test]
    fn sends_legacy_function_schemas() {
        let request = FunctionCall.build_request(vec![], &[testing_spec()], true);
        assert!(matches!(request.tools, ToolSchemas::Functions(ref defs) if defs.len() == 1));
        assert_eq!(FunctionCall.max_calls_per_turn(), Some(1));
    }
}
