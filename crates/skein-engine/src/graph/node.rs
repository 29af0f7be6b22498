use serde_json::Value;

use skein_core::graph::{NodeKind, ValueType};

use crate::coercion::coerce;
use crate::dispatch::NodeParams;

/// A declared input and its currently bound value.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub key: String,
    pub value: Option<Value>,
    pub value_type: ValueType,
    /// Declared required, or fed by an edge.
    pub required: bool,
    /// Present on parameters the model fills when this node is a tool.
    pub tool_description: Option<String>,
}

/// Where an output value is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub node_id: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub key: String,
    pub value: Option<Value>,
    pub value_type: ValueType,
    pub required: bool,
    pub default_value: Option<Value>,
    pub targets: Vec<OutputTarget>,
}

/// A node of the runtime graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub intro: String,
    pub is_entry: bool,
    pub show_status: bool,
    pub inputs: Vec<NodeInput>,
    pub outputs: Vec<NodeOutput>,
}

impl RuntimeNode {
    pub fn input(&self, key: &str) -> Option<&NodeInput> {
        self.inputs.iter().find(|i| i.key == key)
    }

    pub fn output(&self, key: &str) -> Option<&NodeOutput> {
        self.outputs.iter().find(|o| o.key == key)
    }

    /// Bind a value to an input. Returns false if the node has no such input.
    pub fn bind(&mut self, key: &str, value: Value) -> bool {
        match self.inputs.iter_mut().find(|i| i.key == key) {
            Some(input) => {
                input.value = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, key: &str) {
        if let Some(input) = self.inputs.iter_mut().find(|i| i.key == key) {
            input.value = None;
        }
    }

    /// All required inputs are bound.
    pub fn is_ready(&self) -> bool {
        self.inputs
            .iter()
            .all(|i| !i.required || i.value.is_some())
    }

    /// Bound inputs coerced to their declared types.
    pub fn params(&self) -> NodeParams {
        self.inputs
            .iter()
            .filter_map(|i| {
                let value = coerce(i.value.clone()?, i.value_type)?;
                Some((i.key.clone(), value))
            })
            .collect()
    }

    /// Inputs the model fills when calling this node as a tool.
    pub fn tool_params(&self) -> impl Iterator<Item = &NodeInput> {
        self.inputs.iter().filter(|i| i.tool_description.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(key: &str, value_type: ValueType, required: bool) -> NodeInput {
        NodeInput {
            key: key.into(),
            value: None,
            value_type,
            required,
            tool_description: None,
        }
    }

    fn node() -> RuntimeNode {
        RuntimeNode {
            id: "n".into(),
            kind: NodeKind::HttpRequest,
            name: "n".into(),
            intro: String::new(),
            is_entry: false,
            show_status: false,
            inputs: vec![
                input("city", ValueType::String, true),
                input("limit", ValueType::Number, false),
            ],
            outputs: vec![],
        }
    }

    #[test]
    fn ready_once_required_inputs_bound() {
        let mut n = node();
        assert!(!n.is_ready());
        assert!(n.bind("city", json!("Hangzhou")));
        assert!(n.is_ready());
        assert!(!n.bind("missing", json!(1)));
    }

    #[test]
    fn params_are_coerced() {
        let mut n = node();
        n.bind("city", json!(42));
        n.bind("limit", json!("3"));
        let params = n.params();
        assert_eq!(params["city"], json!("42"));
        assert_eq!(params["limit"], json!(3));
    }

    #[test]
    fn unparsable_number_is_omitted() {
        let mut n = node();
        n.bind("city", json!("x"));
        n.bind("limit", json!(""));
        assert!(!n.params().contains_key("limit"));
    }
}
