use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use skein_core::error::{Result, SkeinError};
use skein_core::graph::{GraphTemplate, NodeTemplate, SELECTED_TOOLS_HANDLE};

use super::edge::RuntimeEdge;
use super::node::{NodeInput, NodeOutput, RuntimeNode};
use super::runtime::RuntimeGraph;
use crate::context::RunUser;
use crate::handler::HandlerRegistry;

/// Build the runtime graph for one run.
///
/// Validates node ids, edge endpoints and handler coverage, keeps only the
/// inputs that can ever hold a value, and substitutes `{{variable}}`
/// references in string input values.
pub fn load(
    template: &GraphTemplate,
    variables: &Map<String, Value>,
    registry: &HandlerRegistry,
) -> Result<RuntimeGraph> {
    let mut ids = HashSet::new();
    for node in &template.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(SkeinError::InvalidGraph(format!("duplicate node id: {}", node.id)));
        }
        if !registry.contains(node.kind) {
            return Err(SkeinError::MissingHandler(node.kind.to_string()));
        }
    }

    for edge in &template.edges {
        let source = find(template, &edge.source)?;
        let target = find(template, &edge.target)?;
        if edge.source_handle != SELECTED_TOOLS_HANDLE
            && !source.outputs.iter().any(|o| o.key == edge.source_handle)
        {
            return Err(SkeinError::InvalidGraph(format!(
                "edge source handle {}.{} is not a declared output",
                edge.source, edge.source_handle
            )));
        }
        if edge.target_handle != SELECTED_TOOLS_HANDLE
            && !target.inputs.iter().any(|i| i.key == edge.target_handle)
        {
            return Err(SkeinError::InvalidGraph(format!(
                "edge target handle {}.{} is not a declared input",
                edge.target, edge.target_handle
            )));
        }
    }

    let edges: Vec<RuntimeEdge> = template.edges.iter().map(RuntimeEdge::from).collect();
    let tool_nodes: HashSet<&str> = edges
        .iter()
        .filter(|e| e.is_tool_selection())
        .map(|e| e.target.as_str())
        .collect();
    let connected: HashSet<(&str, &str)> = edges
        .iter()
        .filter(|e| e.active)
        .map(|e| (e.target.as_str(), e.target_handle.as_str()))
        .collect();

    let nodes = template
        .nodes
        .iter()
        .map(|t| build_node(t, tool_nodes.contains(t.id.as_str()), &connected, variables))
        .collect();

    debug!(
        nodes = template.nodes.len(),
        edges = edges.len(),
        tools = tool_nodes.len(),
        "Loaded runtime graph"
    );
    Ok(RuntimeGraph::new(nodes, edges))
}

fn find<'a>(template: &'a GraphTemplate, id: &str) -> Result<&'a NodeTemplate> {
    template
        .nodes
        .iter()
        .find(|n| n.id == id)
        .ok_or_else(|| SkeinError::UnknownNode(id.to_string()))
}

fn build_node(
    t: &NodeTemplate,
    is_tool: bool,
    connected: &HashSet<(&str, &str)>,
    variables: &Map<String, Value>,
) -> RuntimeNode {
    let inputs = t
        .inputs
        .iter()
        .filter_map(|input| {
            let is_connected = connected.contains(&(t.id.as_str(), input.key.as_str()));
            let capture_slot = is_tool && input.tool_description.is_some();
            if !(input.system || is_connected || input.value.is_some() || capture_slot) {
                return None;
            }
            let value = input.value.clone().map(|v| match v {
                Value::String(s) => Value::String(substitute_variables(&s, variables)),
                other => other,
            });
            Some(NodeInput {
                key: input.key.clone(),
                value,
                value_type: input.value_type,
                required: input.required || is_connected,
                tool_description: input.tool_description.clone(),
            })
        })
        .collect();

    let outputs = t
        .outputs
        .iter()
        .map(|o| NodeOutput {
            key: o.key.clone(),
            value: None,
            value_type: o.value_type,
            required: o.required,
            default_value: o.default_value.clone(),
            targets: Vec::new(),
        })
        .collect();

    RuntimeNode {
        id: t.id.clone(),
        kind: t.kind,
        name: t.name.clone().unwrap_or_else(|| t.id.clone()),
        intro: t.intro.clone(),
        is_entry: t.is_entry,
        show_status: t.show_status,
        inputs,
        outputs,
    }
}

/// Replace `{{name}}` with the variable's text; unknown names stay as written.
pub fn substitute_variables(text: &str, variables: &Map<String, Value>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\{\{([^{}]+?)\}\}").unwrap());

    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match variables.get(caps[1].trim()) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Variables the engine provides to every run.
pub fn system_variables(user: &RunUser, now: DateTime<Utc>) -> Map<String, Value> {
    const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %A";
    let time = match FixedOffset::east_opt(user.utc_offset_hours.saturating_mul(3600)) {
        Some(offset) => now.with_timezone(&offset).format(TIME_FORMAT).to_string(),
        None => now.format(TIME_FORMAT).to_string(),
    };

    let mut vars = Map::new();
    vars.insert("cTime".into(), Value::String(time));
    vars.insert("userId".into(), Value::String(user.id.clone()));
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{builtin_registry, tool_agent_template};
    use chrono::TimeZone;
    use serde_json::json;
    use skein_core::graph::NodeKind;

    fn vars() -> Map<String, Value> {
        Map::from_iter([
            ("city".to_string(), json!("Hangzhou")),
            ("count".to_string(), json!(3)),
        ])
    }

    #[test]
    fn substitutes_known_variables() {
        assert_eq!(
            substitute_variables("time in {{city}} x{{count}} {{missing}}", &vars()),
            "time in Hangzhou x3 {{missing}}"
        );
    }

    #[test]
    fn loads_tool_graph() {
        let graph = load(&tool_agent_template(), &vars(), &builtin_registry()).unwrap();
        assert_eq!(graph.entry_ids(), vec!["start".to_string()]);
        assert_eq!(graph.tool_node_ids("agent"), vec!["getTime".to_string()]);

        let tool = graph.node("getTime").unwrap();
        let city = tool.input("city").unwrap();
        assert!(city.value.is_none());
        assert!(city.tool_description.is_some());

        let agent = graph.node("agent").unwrap();
        assert!(agent.input("userChatInput").unwrap().required);
        assert_eq!(agent.output("answerText").unwrap().targets.len(), 0);
    }

    #[test]
    fn unbound_unconnected_inputs_are_dropped() {
        let mut template = tool_agent_template();
        let agent = template.nodes.iter_mut().find(|n| n.id == "agent").unwrap();
        agent.inputs.push(serde_json::from_value(json!({"key": "unused"})).unwrap());
        let graph = load(&template, &vars(), &builtin_registry()).unwrap();
        assert!(graph.node("agent").unwrap().input("unused").is_none());
    }

    #[test]
    fn string_values_are_substituted() {
        let mut template = tool_agent_template();
        let agent = template.nodes.iter_mut().find(|n| n.id == "agent").unwrap();
        agent.inputs.push(
            serde_json::from_value(json!({"key": "systemPrompt", "value": "You help in {{city}}"}))
                .unwrap(),
        );
        let graph = load(&template, &vars(), &builtin_registry()).unwrap();
        let prompt = graph.node("agent").unwrap().input("systemPrompt").unwrap();
        assert_eq!(prompt.value, Some(json!("You help in Hangzhou")));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut template = tool_agent_template();
        let dup = template.nodes[0].clone();
        template.nodes.push(dup);
        let err = load(&template, &vars(), &builtin_registry()).unwrap_err();
        assert!(matches!(err, SkeinError::InvalidGraph(_)));
    }

    #[test]
    fn rejects_bad_edges() {
        let mut template = tool_agent_template();
        template.edges.push(
            serde_json::from_value(json!({
                "source": "start", "source_handle": "nope",
                "target": "agent", "target_handle": "userChatInput"
            }))
            .unwrap(),
        );
        assert!(matches!(
            load(&template, &vars(), &builtin_registry()),
            Err(SkeinError::InvalidGraph(_))
        ));

        let mut template = tool_agent_template();
        template.edges.push(
            serde_json::from_value(json!({
                "source": "ghost", "source_handle": "x",
                "target": "agent", "target_handle": "userChatInput"
            }))
            .unwrap(),
        );
        assert!(matches!(
            load(&template, &vars(), &builtin_registry()),
            Err(SkeinError::UnknownNode(_))
        ));
    }

    #[test]
    fn rejects_kinds_without_handler() {
        let template = tool_agent_template();
        let registry = HandlerRegistry::new();
        let err = load(&template, &vars(), &registry).unwrap_err();
        assert!(matches!(err, SkeinError::MissingHandler(_)));

        let mut only_builtins = tool_agent_template();
        only_builtins.nodes.retain(|n| n.kind != NodeKind::HttpRequest);
        only_builtins.edges.retain(|e| e.target != "getTime");
        assert!(load(&only_builtins, &vars(), &HandlerRegistry::with_builtins()).is_ok());
    }

    #[test]
    fn system_time_uses_user_offset() {
        let user = RunUser {
            utc_offset_hours: 8,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 4, 0, 0).unwrap();
        let vars = system_variables(&user, now);
        assert_eq!(vars["cTime"], json!("2024-05-05 12:00:00 Sunday"));
    }
}
