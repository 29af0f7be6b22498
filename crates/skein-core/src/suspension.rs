//! Checkpoints for runs paused on human input.
//!
//! A suspension is returned to the caller verbatim and handed back on the
//! next request together with the human reply. When the pause happens inside
//! a tool call the outer tools node wraps the inner suspension in a
//! [`ToolCheckpoint`], so nested tool loops unwind and resume level by level.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::Message;

/// What the paused node is asking the human for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InteractivePrompt {
    UserSelect {
        description: String,
        options: Vec<String>,
    },
    UserInput {
        description: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractiveSuspension {
    /// Nodes to dispatch first when the run resumes.
    pub entry_node_ids: Vec<String>,
    /// Inputs those nodes had bound when the run paused.
    #[serde(default)]
    pub entry_inputs: BTreeMap<String, Map<String, Value>>,
    pub prompt: InteractivePrompt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<Box<ToolCheckpoint>>,
}

/// State of a tool loop that was waiting on a tool call when the run paused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCheckpoint {
    /// Suspension raised inside the tool's sub-graph.
    pub inner: InteractiveSuspension,
    pub tool_call_id: String,
    /// Loop transcript after the last user message.
    pub memory_messages: Vec<Message>,
}

impl InteractiveSuspension {
    pub fn new(entry_node_ids: Vec<String>, prompt: InteractivePrompt) -> Self {
        Self {
            entry_node_ids,
            entry_inputs: BTreeMap::new(),
            prompt,
            tool: None,
        }
    }

    /// Wrap a suspension raised inside a tool call of `node_id`.
    pub fn wrap_tool(
        node_id: impl Into<String>,
        inner: InteractiveSuspension,
        tool_call_id: impl Into<String>,
        memory_messages: Vec<Message>,
    ) -> Self {
        Self {
            entry_node_ids: vec![node_id.into()],
            entry_inputs: BTreeMap::new(),
            prompt: inner.prompt.clone(),
            tool: Some(Box::new(ToolCheckpoint {
                inner,
                tool_call_id: tool_call_id.into(),
                memory_messages,
            })),
        }
    }

    pub fn is_entry(&self, node_id: &str) -> bool {
        self.entry_node_ids.iter().any(|id| id == node_id)
    }

    /// Nesting depth of tool checkpoints below this level.
    pub fn depth(&self) -> usize {
        match &self.tool {
            Some(checkpoint) => 1 + checkpoint.inner.depth(),
            None => 0,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
