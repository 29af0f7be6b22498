//! Fixtures for the engine's unit tests.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use skein_core::config::{EngineConfig, ToolProtocolKind};
use skein_core::error::Result;
use skein_core::graph::{EdgeTemplate, GraphTemplate, NodeKind, NodeTemplate, SELECTED_TOOLS_HANDLE};
use skein_test_utils::{test_config, FixedTokenCounter, RecordingSink, ScriptedLlm};

use crate::context::{ExecutionContext, RunBudget, RunUser, Services};
use crate::dispatch::{DispatchResult, NodeParams, NodeResponse};
use crate::graph::{load, RuntimeNode, SharedGraph};
use crate::handler::{HandlerRegistry, NodeHandler};
use crate::stream::StreamWriter;
use crate::usage::UsageAccumulator;

pub const FAKE_TIME: &str = "2024-05-05T12:00";

/// Stands in for an HTTP tool that returns the time.
struct FakeClock;

impl NodeHandler for FakeClock {
    fn dispatch<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        _params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(async move {
            let response = NodeResponse {
                node_id: node.id.clone(),
                module_name: node.name.clone(),
                module_type: node.kind.to_string(),
                ..Default::default()
            };
            Ok(DispatchResult {
                tool_response: Some(json!(FAKE_TIME)),
                ..DispatchResult::new().output("time", FAKE_TIME).response(response)
            })
        })
    }
}

pub struct TestContext {
    pub ctx: ExecutionContext,
    pub sink: Arc<RecordingSink>,
    pub llm: Arc<ScriptedLlm>,
}

pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::with_builtins();
    registry.register(NodeKind::HttpRequest, Arc::new(FakeClock));
    registry
}

pub fn node_template(id: &str, kind: NodeKind, entry: bool) -> NodeTemplate {
    NodeTemplate {
        id: id.into(),
        kind,
        name: None,
        intro: String::new(),
        is_entry: entry,
        show_status: false,
        inputs: vec![],
        outputs: vec![],
    }
}

fn edge(source: &str, source_handle: &str, target: &str, target_handle: &str) -> EdgeTemplate {
    EdgeTemplate {
        source: source.into(),
        source_handle: source_handle.into(),
        target: target.into(),
        target_handle: target_handle.into(),
    }
}

/// start -> agent (tools), with `getTime` selected as its only tool.
pub fn tool_agent_template() -> GraphTemplate {
    let mut start = node_template("start", NodeKind::WorkflowStart, true);
    start.inputs = vec![serde_json::from_value(json!({"key": "userChatInput", "system": true})).unwrap()];
    start.outputs = vec![serde_json::from_value(json!({"key": "userChatInput"})).unwrap()];

    let mut agent = node_template("agent", NodeKind::Tools, false);
    agent.name = Some("Agent".into());
    agent.inputs = vec![
        serde_json::from_value(json!({"key": "model", "value": "test-model"})).unwrap(),
        serde_json::from_value(json!({"key": "userChatInput"})).unwrap(),
    ];
    agent.outputs = vec![serde_json::from_value(json!({"key": "answerText"})).unwrap()];

    let mut clock = node_template("getTime", NodeKind::HttpRequest, false);
    clock.name = Some("Get time".into());
    clock.intro = "Current local time of a city".into();
    clock.inputs = vec![serde_json::from_value(json!({
        "key": "city",
        "required": true,
        "tool_description": "City name"
    }))
    .unwrap()];
    clock.outputs = vec![serde_json::from_value(json!({"key": "time"})).unwrap()];

    GraphTemplate {
        nodes: vec![start, agent, clock],
        edges: vec![
            edge("start", "userChatInput", "agent", "userChatInput"),
            edge("agent", SELECTED_TOOLS_HANDLE, "getTime", SELECTED_TOOLS_HANDLE),
        ],
    }
}

fn build(
    template: GraphTemplate,
    config: EngineConfig,
    registry: HandlerRegistry,
    llm: ScriptedLlm,
    budget: u32,
) -> TestContext {
    let graph = load(&template, &Default::default(), &registry).unwrap();
    let sink = Arc::new(RecordingSink::new());
    let llm = Arc::new(llm);
    let services = Services {
        usage: UsageAccumulator::from_config(&config),
        config,
        llm: llm.clone(),
        tokens: Arc::new(FixedTokenCounter(10)),
        registry,
    };
    let ctx = ExecutionContext {
        services: Arc::new(services),
        graph: SharedGraph::new(graph),
        writer: StreamWriter::new(sink.clone(), true),
        budget: RunBudget::new(budget),
        histories: Arc::new(vec![]),
        variables: Arc::new(Default::default()),
        query: "What time is it in Hangzhou?".into(),
        user: RunUser::default(),
        depth: 0,
        stream: true,
        resume: None,
    };
    TestContext { ctx, sink, llm }
}

/// Context over `template` with extra handlers and a dispatch budget.
pub fn context_with(
    template: GraphTemplate,
    budget: u32,
    configure: impl FnOnce(&mut HandlerRegistry),
) -> TestContext {
    let mut registry = builtin_registry();
    configure(&mut registry);
    build(
        template,
        test_config(ToolProtocolKind::ToolChoice),
        registry,
        ScriptedLlm::new(),
        budget,
    )
}

pub fn tool_context(template: GraphTemplate, llm: ScriptedLlm, protocol: ToolProtocolKind) -> TestContext {
    tool_context_with(template, llm, test_config(protocol))
}

pub fn tool_context_with(template: GraphTemplate, llm: ScriptedLlm, config: EngineConfig) -> TestContext {
    let budget = config.engine.max_run_times;
    build(template, config, builtin_registry(), llm, budget)
}
