//! Static graph templates as stored by an application, before loading.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output handle whose edges register tool nodes instead of carrying data.
pub const SELECTED_TOOLS_HANDLE: &str = "selectedTools";
/// Trigger input cleared after each dispatch so a node can re-arm.
pub const SWITCH_INPUT: &str = "switch";
/// Output set to `true` whenever a node that declares it completes.
pub const FINISH_OUTPUT: &str = "finish";
/// Input that receives the user's query on entry nodes.
pub const USER_CHAT_INPUT: &str = "userChatInput";

/// Node kinds known to the engine. Kinds without a built-in handler must be
/// registered by the embedding application before a graph using them loads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    WorkflowStart,
    Answer,
    ChatNode,
    Tools,
    StopTool,
    UserSelect,
    HttpRequest,
    DatasetSearch,
    ClassifyQuestion,
    ContentExtract,
    Code,
    PluginModule,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::Answer => "answer",
            Self::ChatNode => "chat_node",
            Self::Tools => "tools",
            Self::StopTool => "stop_tool",
            Self::UserSelect => "user_select",
            Self::HttpRequest => "http_request",
            Self::DatasetSearch => "dataset_search",
            Self::ClassifyQuestion => "classify_question",
            Self::ContentExtract => "content_extract",
            Self::Code => "code",
            Self::PluginModule => "plugin_module",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared semantic type of an input or output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    ArrayString,
    ArrayNumber,
    ArrayBoolean,
    ArrayObject,
    ArrayAny,
    ChatHistory,
    DatasetQuote,
}

impl ValueType {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Self::ArrayString
                | Self::ArrayNumber
                | Self::ArrayBoolean
                | Self::ArrayObject
                | Self::ArrayAny
                | Self::ChatHistory
                | Self::DatasetQuote
        )
    }

    /// JSON Schema type name used in tool definitions.
    pub fn schema_type(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            t if t.is_array() => "array",
            _ => "string",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphTemplate {
    #[serde(default)]
    pub nodes: Vec<NodeTemplate>,
    #[serde(default)]
    pub edges: Vec<EdgeTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Description shown to the model when this node is used as a tool.
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub is_entry: bool,
    #[serde(default)]
    pub show_status: bool,
    #[serde(default)]
    pub inputs: Vec<InputTemplate>,
    #[serde(default)]
    pub outputs: Vec<OutputTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTemplate {
    pub key: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    /// System inputs are always kept, bound or not.
    #[serde(default)]
    pub system: bool,
    /// Marks the input as a parameter the model fills when calling this node as a tool.
    #[serde(default)]
    pub tool_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputTemplate {
    pub key: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTemplate {
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_from_json() {
        let template: GraphTemplate = serde_json::from_value(serde_json::json!({
            "nodes": [{
                "id": "start",
                "kind": "workflow_start",
                "is_entry": true,
                "inputs": [{"key": "userChatInput", "value_type": "string", "system": true}],
                "outputs": [{"key": "userChatInput", "value_type": "string"}]
            }],
            "edges": []
        }))
        .unwrap();
        let node = &template.nodes[0];
        assert_eq!(node.kind, NodeKind::WorkflowStart);
        assert!(node.is_entry);
        assert_eq!(node.inputs[0].value_type, ValueType::String);
        assert!(node.outputs[0].default_value.is_none());
    }

    #[test]
    fn schema_types() {
        assert_eq!(ValueType::Number.schema_type(), "number");
        assert_eq!(ValueType::ArrayObject.schema_type(), "array");
        assert_eq!(ValueType::Any.schema_type(), "string");
    }
}
