use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

use skein_core::traits::TokenCounter;
use skein_core::types::{Message, ToolDefinition};

/// Per-message framing overhead (role, separators).
const MESSAGE_OVERHEAD: usize = 4;

fn tokenizer() -> &'static CoreBPE {
    static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();
    TOKENIZER.get_or_init(|| {
        tiktoken_rs::cl100k_base().expect("Failed to load cl100k_base tokenizer")
    })
}

/// BPE token count of raw text (cl100k_base).
pub fn count_text(text: &str) -> usize {
    tokenizer().encode_ordinary(text).len()
}

pub fn count_message(msg: &Message) -> usize {
    let calls: usize = msg
        .tool_calls
        .iter()
        .map(|c| count_text(&c.name) + count_text(&c.arguments))
        .sum();
    count_text(&msg.content) + calls + MESSAGE_OVERHEAD
}

/// Token counter backed by `tiktoken-rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiktokenCounter;

impl TokenCounter for TiktokenCounter {
    fn count(&self, messages: &[Message], tools: Option<&[ToolDefinition]>) -> usize {
        let tools = tools
            .map(|defs| count_text(&serde_json::to_string(defs).unwrap_or_default()))
            .unwrap_or(0);
        messages.iter().map(count_message).sum::<usize>() + tools
    }
}
