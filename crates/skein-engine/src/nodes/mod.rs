//! Built-in handlers for node kinds that need no outside collaborator.
//!
//! Business nodes such as HTTP requests or dataset search are registered by
//! the embedding application.

pub mod answer;
pub mod chat;
pub mod start;
pub mod stop_tool;
pub mod tools;
pub mod user_select;

use std::sync::Arc;

use skein_core::graph::NodeKind;
use skein_core::types::Message;

use crate::handler::HandlerRegistry;

/// Separator between the model's default system prompt and the node's own.
const SYSTEM_PROMPT_SEPARATOR: &str = "\n\n===---===---===\n\n";

pub fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register(NodeKind::WorkflowStart, Arc::new(start::StartHandler));
    registry.register(NodeKind::Answer, Arc::new(answer::AnswerHandler));
    registry.register(NodeKind::ChatNode, Arc::new(chat::ChatHandler));
    registry.register(NodeKind::Tools, Arc::new(tools::ToolsHandler));
    registry.register(NodeKind::StopTool, Arc::new(stop_tool::StopToolHandler));
    registry.register(NodeKind::UserSelect, Arc::new(user_select::UserSelectHandler));
}

/// Join the non-empty system prompts.
pub fn compose_system_prompt(default: Option<&str>, custom: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [default, custom]
        .into_iter()
        .flatten()
        .filter(|p| !p.trim().is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(SYSTEM_PROMPT_SEPARATOR))
}

/// The last `rounds` user/assistant rounds of the conversation history.
pub fn recent_history(histories: &[Message], rounds: usize) -> Vec<Message> {
    let keep = rounds.saturating_mul(2).min(histories.len());
    histories[histories.len() - keep..].to_vec()
}
