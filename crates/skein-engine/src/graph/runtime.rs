use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use skein_core::graph::{FINISH_OUTPUT, SWITCH_INPUT};

use super::edge::RuntimeEdge;
use super::node::{OutputTarget, RuntimeNode};
use crate::coercion::coerce;
use crate::dispatch::NodeParams;

/// Nodes and edges of one top-level run.
#[derive(Debug, Clone)]
pub struct RuntimeGraph {
    nodes: Vec<RuntimeNode>,
    index: HashMap<String, usize>,
    edges: Vec<RuntimeEdge>,
}

impl RuntimeGraph {
    /// Build a graph, deriving output targets from the active edges.
    pub fn new(mut nodes: Vec<RuntimeNode>, edges: Vec<RuntimeEdge>) -> Self {
        for node in &mut nodes {
            for output in &mut node.outputs {
                output.targets = edges
                    .iter()
                    .filter(|e| e.active && e.source == node.id && e.source_handle == output.key)
                    .map(|e| OutputTarget {
                        node_id: e.target.clone(),
                        key: e.target_handle.clone(),
                    })
                    .collect();
            }
        }
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self {
            nodes,
            index,
            edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&RuntimeNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut RuntimeNode> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_entry)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Make exactly `ids` the entry nodes.
    pub fn set_entries(&mut self, ids: &[String]) {
        for node in &mut self.nodes {
            node.is_entry = ids.contains(&node.id);
        }
    }

    /// Bind values to the inputs of `id` that exist; other keys are ignored.
    pub fn bind_inputs(&mut self, id: &str, values: &Map<String, Value>) {
        if let Some(node) = self.node_mut(id) {
            for (key, value) in values {
                node.bind(key, value.clone());
            }
        }
    }

    /// Tool nodes registered on `tools_node_id`, in edge order.
    pub fn tool_node_ids(&self, tools_node_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for edge in &self.edges {
            if edge.is_tool_selection() && edge.source == tools_node_id && !ids.contains(&edge.target) {
                ids.push(edge.target.clone());
            }
        }
        ids
    }

    /// Bind model-supplied arguments to a tool node's parameter slots and
    /// mark it as an entry.
    pub fn activate_tool(&mut self, id: &str, args: &Map<String, Value>) {
        if let Some(node) = self.node_mut(id) {
            for input in node.inputs.iter_mut().filter(|i| i.tool_description.is_some()) {
                if let Some(value) = args.get(&input.key) {
                    input.value = Some(value.clone());
                }
            }
            node.is_entry = true;
        }
    }

    /// If `id` is an entry or is ready, snapshot it with its coerced params,
    /// then clear its entry flag and trigger input so it must be re-armed to
    /// run again.
    pub fn prepare_dispatch(&mut self, id: &str) -> Option<(RuntimeNode, NodeParams)> {
        let node = self.node_mut(id)?;
        if !node.is_entry && !node.is_ready() {
            return None;
        }
        let params = node.params();
        let snapshot = node.clone();
        node.is_entry = false;
        node.clear(SWITCH_INPUT);
        Some((snapshot, params))
    }

    /// Store a node's outputs and push them to connected inputs.
    ///
    /// Required outputs missing from `outputs` take their coerced default,
    /// and a declared `finish` output is set. Returns the target node ids,
    /// deduplicated in first-seen order.
    pub fn apply_outputs(&mut self, id: &str, outputs: &mut Map<String, Value>) -> Vec<String> {
        let Some(node) = self.node_mut(id) else {
            return Vec::new();
        };

        let mut deliveries: Vec<(OutputTarget, Value)> = Vec::new();
        for output in &mut node.outputs {
            if output.key == FINISH_OUTPUT && !outputs.contains_key(FINISH_OUTPUT) {
                outputs.insert(FINISH_OUTPUT.to_string(), Value::Bool(true));
            }
            if output.required && !outputs.contains_key(&output.key) {
                if let Some(default) = output
                    .default_value
                    .clone()
                    .and_then(|v| coerce(v, output.value_type))
                {
                    outputs.insert(output.key.clone(), default);
                }
            }
            let Some(value) = outputs.get(&output.key) else {
                continue;
            };
            output.value = Some(value.clone());
            for target in &output.targets {
                deliveries.push((target.clone(), value.clone()));
            }
        }

        let mut targets: Vec<String> = Vec::new();
        for (target, value) in deliveries {
            if let Some(node) = self.node_mut(&target.node_id) {
                node.bind(&target.key, value);
                if !targets.contains(&target.node_id) {
                    targets.push(target.node_id);
                }
            }
        }
        targets
    }
}

/// The runtime graph shared by a run and every nested run it starts.
/// The lock is never held across an await.
#[derive(Debug, Clone)]
pub struct SharedGraph(Arc<Mutex<RuntimeGraph>>);

impl SharedGraph {
    pub fn new(graph: RuntimeGraph) -> Self {
        Self(Arc::new(Mutex::new(graph)))
    }

    pub fn read<R>(&self, f: impl FnOnce(&RuntimeGraph) -> R) -> R {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut RuntimeGraph) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{NodeInput, NodeOutput};
    use serde_json::json;
    use skein_core::graph::{NodeKind, ValueType, SELECTED_TOOLS_HANDLE};

    fn node(id: &str, inputs: &[(&str, bool)], outputs: &[&str]) -> RuntimeNode {
        RuntimeNode {
            id: id.into(),
            kind: NodeKind::HttpRequest,
            name: id.into(),
            intro: String::new(),
            is_entry: false,
            show_status: false,
            inputs: inputs
                .iter()
                .map(|(k, required)| NodeInput {
                    key: k.to_string(),
                    value: None,
                    value_type: ValueType::Any,
                    required: *required,
                    tool_description: None,
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|k| NodeOutput {
                    key: k.to_string(),
                    value: None,
                    value_type: ValueType::Any,
                    required: false,
                    default_value: None,
                    targets: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn outputs_reach_each_target_once() {
        let mut graph = RuntimeGraph::new(
            vec![
                node("a", &[], &["x", "y"]),
                node("b", &[("x", true), ("y", true)], &[]),
            ],
            vec![
                RuntimeEdge::new("a", "x", "b", "x"),
                RuntimeEdge::new("a", "y", "b", "y"),
            ],
        );
        let mut outputs = Map::from_iter([("x".into(), json!(1)), ("y".into(), json!(2))]);
        let targets = graph.apply_outputs("a", &mut outputs);
        assert_eq!(targets, vec!["b".to_string()]);
        assert!(graph.node("b").unwrap().is_ready());
    }

    #[test]
    fn required_output_defaults() {
        let mut a = node("a", &[], &["x"]);
        a.outputs[0].required = true;
        a.outputs[0].value_type = ValueType::Number;
        a.outputs[0].default_value = Some(json!("7"));
        let mut graph = RuntimeGraph::new(
            vec![a, node("b", &[("x", true)], &[])],
            vec![RuntimeEdge::new("a", "x", "b", "x")],
        );
        let mut outputs = Map::new();
        graph.apply_outputs("a", &mut outputs);
        assert_eq!(outputs["x"], json!(7));
        assert_eq!(graph.node("b").unwrap().input("x").unwrap().value, Some(json!(7)));
    }

    #[test]
    fn prepare_clears_switch_and_entry() {
        let mut graph = RuntimeGraph::new(vec![node("a", &[(SWITCH_INPUT, true)], &[])], vec![]);
        assert!(graph.prepare_dispatch("a").is_none());

        graph.set_entries(&["a".to_string()]);
        let (snapshot, _) = graph.prepare_dispatch("a").unwrap();
        assert!(snapshot.is_entry);
        assert!(graph.prepare_dispatch("a").is_none());

        graph.node_mut("a").unwrap().bind(SWITCH_INPUT, json!(true));
        assert!(graph.prepare_dispatch("a").is_some());
        let after = graph.node("a").unwrap();
        assert!(!after.is_entry);
        assert!(!after.is_ready());
    }

    #[test]
    fn tool_nodes_and_activation() {
        let mut tool = node("getTime", &[("city", true)], &[]);
        tool.inputs[0].tool_description = Some("City name".into());
        let mut graph = RuntimeGraph::new(
            vec![node("agent", &[], &[]), tool],
            vec![RuntimeEdge::new(
                "agent",
                SELECTED_TOOLS_HANDLE,
                "getTime",
                SELECTED_TOOLS_HANDLE,
            )],
        );
        assert_eq!(graph.tool_node_ids("agent"), vec!["getTime".to_string()]);

        graph.activate_tool("getTime", &Map::from_iter([("city".into(), json!("Hangzhou"))]));
        let tool = graph.node("getTime").unwrap();
        assert!(tool.is_entry);
        assert!(tool.is_ready());
    }
}
