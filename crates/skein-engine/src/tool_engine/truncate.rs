use skein_core::traits::TokenCounter;
use skein_core::types::{Message, Role, ToolDefinition};
use tracing::debug;

/// Drop the oldest conversation turns until `messages` fit in `budget`
/// tokens.
///
/// Leading system messages and everything from the last user message on are
/// always kept. An assistant message that called tools goes together with
/// the tool responses that follow it. Returns the number of messages removed.
pub fn fit_to_context(
    messages: &mut Vec<Message>,
    counter: &dyn TokenCounter,
    tools: Option<&[ToolDefinition]>,
    budget: usize,
) -> usize {
    let mut removed = 0;

    loop {
        if counter.count(messages, tools) <= budget {
            break;
        }

        let head = messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        let tail = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(messages.len());
        if head >= tail {
            break;
        }

        let mut end = head + 1;
        if messages[head].has_tool_calls() {
            while end < tail && messages[end].role == Role::Tool {
                end += 1;
            }
        }
        messages.drain(head..end);
        removed += end - head;
    }

    if removed > 0 {
        debug!(removed, budget, "Truncated messages to context window");
    }
    removed
}
