//! The agentic loop behind `tools` nodes.
//!
//! The model is called with the conversation and the schemas of every node
//! wired to the tools node through a `selectedTools` edge. Each tool call
//! binds the model's arguments into the tool node and runs it as a
//! sub-graph through the [`Scheduler`]; the payload goes back to the model
//! and the loop continues until the model answers, a tool asks to stop, a
//! tool needs human input, or the iteration limit is hit.

pub mod format;
pub mod function_call;
pub mod prompt_call;
pub mod protocol;
pub mod tool_choice;
pub mod truncate;

use std::collections::HashSet;

use futures::future::try_join_all;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use skein_core::config::ModelConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::event::SseEvent;
use skein_core::graph::{ValueType, USER_CHAT_INPUT};
use skein_core::suspension::{InteractiveSuspension, ToolCheckpoint};
use skein_core::types::*;

use crate::context::ExecutionContext;
use crate::dispatch::{push_fragment, AssistantFragment, DispatchResult, FlowResponse, NodeParams, NodeResponse, ParamsExt};
use crate::graph::RuntimeNode;
use crate::nodes::{compose_system_prompt, recent_history};
use crate::scheduler::Scheduler;

use format::{format_tool_response, parse_arguments, preview};
pub use protocol::{for_kind, ModelTurn, ParsedTurn, RelayState, ToolProtocol};
use truncate::fit_to_context;

/// Default number of past conversation rounds sent to the model.
const DEFAULT_HISTORY: u64 = 6;

/// A model-fillable parameter of a tool node.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    pub key: String,
    pub value_type: ValueType,
    pub description: String,
    pub required: bool,
}

/// A node exposed to the model as a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    /// Also the function name the model calls.
    pub node_id: String,
    pub name: String,
    pub intro: String,
    pub params: Vec<ToolParam>,
}

impl ToolSpec {
    pub fn from_node(node: &RuntimeNode) -> Self {
        Self {
            node_id: node.id.clone(),
            name: node.name.clone(),
            intro: node.intro.clone(),
            params: node
                .tool_params()
                .map(|input| ToolParam {
                    key: input.key.clone(),
                    value_type: input.value_type,
                    description: input.tool_description.clone().unwrap_or_default(),
                    required: input.required,
                })
                .collect(),
        }
    }

    pub fn required_keys(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.key.as_str())
            .collect()
    }

    pub fn definition(&self) -> ToolDefinition {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.key.clone(),
                    json!({"type": p.value_type.schema_type(), "description": p.description}),
                )
            })
            .collect();
        ToolDefinition {
            name: self.node_id.clone(),
            description: self.intro.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": self.required_keys(),
            }),
        }
    }
}

/// Mutable state of one tools-node invocation.
#[derive(Debug, Default)]
pub struct ToolLoopState {
    /// Conversation as sent to the model, in the protocol's shape.
    pub messages: Vec<Message>,
    /// Protocol-independent record of the rounds after the user message.
    pub transcript: Vec<Message>,
    pub iterations_left: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Per model call.
    pub iterations: Vec<Usage>,
    /// The model's own answer text.
    pub answer: String,
    pub fragments: Vec<AssistantFragment>,
    pub dispatches: Vec<FlowResponse>,
    pub suspension: Option<InteractiveSuspension>,
    pub stopped: bool,
}

impl ToolLoopState {
    pub fn new(messages: Vec<Message>, iterations: usize) -> Self {
        Self {
            messages,
            iterations_left: iterations,
            ..Default::default()
        }
    }

    fn add_usage(&mut self, usage: Usage) {
        self.input_tokens += usage.prompt_tokens;
        self.output_tokens += usage.completion_tokens;
        self.iterations.push(usage);
    }

    fn add_answer(&mut self, text: &str) {
        self.answer.push_str(text);
        push_fragment(
            &mut self.fragments,
            AssistantFragment::Text {
                content: text.to_string(),
            },
        );
    }
}

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct StreamedTurn {
    turn: ModelTurn,
    usage: Option<Usage>,
    relay: RelayState,
    /// Calls whose `toolCall` frame went out while streaming.
    announced: HashSet<String>,
}

struct ToolRun {
    call: ToolCall,
    response: String,
    flow: FlowResponse,
}

/// Run a `tools` node.
pub async fn run_tools_node(
    ctx: &ExecutionContext,
    node: &RuntimeNode,
    params: NodeParams,
) -> Result<DispatchResult> {
    let model_id = params
        .str_param("model")
        .ok_or_else(|| SkeinError::NodeExecution {
            node: node.id.clone(),
            message: "no model selected".into(),
        })?;
    let model = ctx.config().model(model_id)?.clone();
    let query = params.str_param(USER_CHAT_INPUT).unwrap_or_default().to_string();
    let history = params.u64_param("history").unwrap_or(DEFAULT_HISTORY) as usize;

    let tools: Vec<ToolSpec> = ctx.graph.read(|g| {
        g.tool_node_ids(&node.id)
            .iter()
            .filter_map(|id| g.node(id))
            .map(ToolSpec::from_node)
            .collect()
    });
    let checkpoint = ctx.take_tool_checkpoint(&node.id);

    let mut messages = Vec::new();
    if let Some(system) = compose_system_prompt(
        model.default_system_prompt.as_deref(),
        params.str_param("systemPrompt"),
    ) {
        messages.push(Message::system(system));
    }
    let past = if checkpoint.is_some() {
        without_paused_round(&ctx.histories, &query)
    } else {
        &ctx.histories[..]
    };
    messages.extend(recent_history(past, history));
    messages.push(Message::user(query.clone()));

    let tool_loop = ToolLoop::new(ctx, node, &model, tools);
    tool_loop.protocol.prepare(&mut messages, &tool_loop.tools);
    let mut state = ToolLoopState::new(messages, ctx.config().engine.max_tool_iterations);

    info!(
        node_id = %node.id,
        model = %model.id,
        protocol = ?model.tool_protocol,
        tools = tool_loop.tools.len(),
        resume = checkpoint.is_some(),
        "Starting tool loop"
    );

    if let Some(checkpoint) = checkpoint {
        tool_loop.resume(&mut state, checkpoint).await?;
    }
    if state.suspension.is_none() && !state.stopped {
        tool_loop.run(&mut state).await?;
    }
    Ok(tool_loop.finish(state, query))
}

struct ToolLoop<'a> {
    ctx: &'a ExecutionContext,
    node: &'a RuntimeNode,
    model: &'a ModelConfig,
    protocol: Box<dyn ToolProtocol>,
    tools: Vec<ToolSpec>,
    definitions: Vec<ToolDefinition>,
}

impl<'a> ToolLoop<'a> {
    fn new(
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        model: &'a ModelConfig,
        tools: Vec<ToolSpec>,
    ) -> Self {
        Self {
            ctx,
            node,
            model,
            protocol: for_kind(model.tool_protocol),
            definitions: tools.iter().map(ToolSpec::definition).collect(),
            tools,
        }
    }

    fn tool(&self, node_id: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.node_id == node_id)
    }

    fn counted_definitions(&self) -> Option<&[ToolDefinition]> {
        self.protocol.structured().then_some(self.definitions.as_slice())
    }

    fn preview_len(&self) -> usize {
        self.ctx.config().engine.tool_response_preview
    }

    async fn run(&self, state: &mut ToolLoopState) -> Result<()> {
        while state.iterations_left > 0 {
            if self.ctx.writer.is_closed() {
                debug!(node_id = %self.node.id, "Sink closed, ending tool loop");
                break;
            }

            let reserve = self.ctx.config().engine.context_reserve + self.protocol.extra_reserve();
            fit_to_context(
                &mut state.messages,
                self.ctx.services.tokens.as_ref(),
                self.counted_definitions(),
                self.model.max_context.saturating_sub(reserve),
            );

            let request =
                self.protocol
                    .build_request(state.messages.clone(), &self.tools, self.ctx.stream);
            let streamed = self.call_model(request).await?;
            let usage = match streamed.usage {
                Some(usage) => usage,
                None => self.count_usage(&state.messages, &streamed.turn),
            };
            state.add_usage(usage);

            if streamed.turn.content.trim().is_empty() && streamed.turn.calls.is_empty() {
                if self.ctx.writer.is_closed() {
                    break;
                }
                return Err(SkeinError::LlmParse("LLM api response empty".into()));
            }

            match self.protocol.parse_turn(streamed.turn) {
                ParsedTurn::Answer(text) => {
                    self.answer(state, text, &streamed.relay).await;
                    break;
                }
                ParsedTurn::ToolCalls {
                    content,
                    show_content,
                    calls,
                } => {
                    let calls = self.accepted_calls(calls);
                    if calls.is_empty() {
                        self.answer(state, show_content, &streamed.relay).await;
                        break;
                    }
                    if !show_content.is_empty() {
                        if !streamed.relay.forwarded {
                            self.ctx.writer.send(SseEvent::answer(&show_content)).await;
                        }
                        state.add_answer(&show_content);
                    }
                    self.run_round(state, content, calls, &streamed.announced)
                        .await?;
                    if state.suspension.is_some() || state.stopped {
                        break;
                    }
                    state.iterations_left -= 1;
                }
            }
        }

        if state.iterations_left == 0 {
            info!(node_id = %self.node.id, "Tool iteration limit reached");
        }
        Ok(())
    }

    async fn call_model(&self, request: CompletionRequest) -> Result<StreamedTurn> {
        let mut out = StreamedTurn::default();
        match self.ctx.services.llm.complete(self.model, request).await? {
            Completion::Complete(response) => {
                out.turn = ModelTurn {
                    content: response.content,
                    calls: response.tool_calls,
                };
                out.usage = response.usage;
            }
            Completion::Stream(mut stream) => {
                let mut calls: Vec<ToolCallAccumulator> = Vec::new();
                while let Some(delta) = stream.next().await {
                    match delta? {
                        StreamDelta::TextDelta(text) => {
                            if let Some(visible) = self.protocol.relay(&mut out.relay, &text) {
                                if !visible.is_empty() {
                                    out.relay.forwarded = true;
                                    self.ctx.writer.send(SseEvent::answer(visible)).await;
                                }
                            }
                            out.turn.content.push_str(&text);
                        }
                        StreamDelta::ToolCallStart { index, id, name } => {
                            while calls.len() <= index {
                                calls.push(ToolCallAccumulator::default());
                            }
                            if let Some(tool) = self.tool(&name) {
                                self.ctx
                                    .writer
                                    .send(SseEvent::tool_call(&id, &tool.name, &tool.node_id))
                                    .await;
                                out.announced.insert(id.clone());
                            }
                            calls[index].id = id;
                            calls[index].name = name;
                        }
                        StreamDelta::ToolArgsDelta { index, delta } => {
                            if let Some(tc) = calls.get_mut(index) {
                                if out.announced.contains(&tc.id) {
                                    self.ctx.writer.send(SseEvent::tool_params(&tc.id, &delta)).await;
                                }
                                tc.arguments.push_str(&delta);
                            }
                        }
                        StreamDelta::Usage(usage) => out.usage = Some(usage),
                        StreamDelta::Stop(reason) => {
                            debug!(node_id = %self.node.id, ?reason, "Model turn stopped");
                        }
                    }
                    if self.ctx.writer.is_closed() {
                        debug!(node_id = %self.node.id, "Sink closed mid-stream");
                        break;
                    }
                }
                out.turn.calls = calls
                    .into_iter()
                    .filter(|tc| !tc.name.is_empty())
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.name,
                        arguments: tc.arguments,
                    })
                    .collect();
            }
        }
        Ok(out)
    }

    /// Token counts for a turn the provider did not report usage for.
    fn count_usage(&self, messages: &[Message], turn: &ModelTurn) -> Usage {
        let counter = self.ctx.services.tokens.as_ref();
        let reply = Message::assistant_tool_calls(turn.content.clone(), turn.calls.clone());
        Usage {
            prompt_tokens: counter.count(messages, self.counted_definitions()) as u64,
            completion_tokens: counter.count(std::slice::from_ref(&reply), None) as u64,
        }
    }

    fn accepted_calls(&self, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let mut accepted: Vec<ToolCall> = calls
            .into_iter()
            .filter(|call| {
                let known = self.tool(&call.name).is_some();
                if !known {
                    warn!(node_id = %self.node.id, tool = %call.name, "Model called an unknown tool");
                }
                known
            })
            .collect();
        if let Some(max) = self.protocol.max_calls_per_turn() {
            accepted.truncate(max);
        }
        accepted
    }

    async fn answer(&self, state: &mut ToolLoopState, text: String, relay: &RelayState) {
        if !relay.forwarded && !text.is_empty() {
            self.ctx.writer.send(SseEvent::answer(&text)).await;
        }
        state.add_answer(&text);
        let message = Message::assistant(text);
        state.messages.push(message.clone());
        state.transcript.push(message);
    }

    async fn run_round(
        &self,
        state: &mut ToolLoopState,
        content: String,
        calls: Vec<ToolCall>,
        announced: &HashSet<String>,
    ) -> Result<()> {
        for call in calls.iter().filter(|c| !announced.contains(&c.id)) {
            if let Some(tool) = self.tool(&call.name) {
                self.ctx
                    .writer
                    .send(SseEvent::tool_call(&call.id, &tool.name, &tool.node_id))
                    .await;
                self.ctx
                    .writer
                    .send(SseEvent::tool_params(&call.id, &call.arguments))
                    .await;
            }
        }

        let runs = try_join_all(calls.iter().map(|call| self.run_tool(call))).await?;

        let assistant = Message::assistant_tool_calls(content, calls);
        let responses: Vec<Message> = runs
            .iter()
            .map(|run| Message::tool(&run.call.id, &run.call.name, &run.response))
            .collect();
        self.protocol
            .record_round(&mut state.messages, &assistant, &responses);
        state.transcript.push(assistant);
        state.transcript.extend(responses);

        for run in runs {
            self.push_tool_fragments(state, &run.call, &run.response, &run.flow);
            if let Some(inner) = run.flow.interactive.clone() {
                if state.suspension.is_none() {
                    info!(node_id = %self.node.id, tool = %run.call.name, "Tool call waits for user input");
                    state.suspension = Some(InteractiveSuspension::wrap_tool(
                        &self.node.id,
                        inner,
                        &run.call.id,
                        state.transcript.clone(),
                    ));
                }
            }
            state.stopped |= run.flow.tool_stop;
            state.dispatches.push(run.flow);
        }
        Ok(())
    }

    async fn run_tool(&self, call: &ToolCall) -> Result<ToolRun> {
        let args = parse_arguments(&call.arguments);
        // Scheduler::run snapshots the node before its first await, so
        // concurrent calls of the same tool each see their own arguments.
        self.ctx.graph.write(|g| g.activate_tool(&call.name, &args));
        let child = self.ctx.nested();
        let flow = Scheduler::run(&child, vec![call.name.clone()]).await?;

        let response = format_tool_response(flow.tool_response.as_ref());
        self.ctx
            .writer
            .send(SseEvent::tool_response(&call.id, &preview(&response, self.preview_len())))
            .await;
        debug!(
            node_id = %self.node.id,
            tool = %call.name,
            dispatched = flow.dispatch_count,
            "Tool call finished"
        );
        Ok(ToolRun {
            call: call.clone(),
            response,
            flow,
        })
    }

    fn push_tool_fragments(
        &self,
        state: &mut ToolLoopState,
        call: &ToolCall,
        response: &str,
        flow: &FlowResponse,
    ) {
        let tool_name = self
            .tool(&call.name)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| call.name.clone());
        push_fragment(
            &mut state.fragments,
            AssistantFragment::Tool {
                id: call.id.clone(),
                tool_name,
                function_name: call.name.clone(),
                params: call.arguments.clone(),
                response: preview(response, self.preview_len()),
            },
        );
        for fragment in &flow.fragments {
            push_fragment(&mut state.fragments, fragment.clone());
        }
    }

    /// Continue a loop that paused inside a tool call: re-run the paused
    /// sub-graph with the human reply and put its payload where the tool
    /// response was.
    async fn resume(&self, state: &mut ToolLoopState, checkpoint: ToolCheckpoint) -> Result<()> {
        let ToolCheckpoint {
            inner,
            tool_call_id,
            memory_messages,
        } = checkpoint;
        let entries = inner.entry_node_ids.clone();
        self.ctx.graph.write(|g| {
            for (id, inputs) in &inner.entry_inputs {
                g.bind_inputs(id, inputs);
            }
            g.set_entries(&entries);
        });

        let child = self.ctx.nested();
        let flow = Scheduler::run(&child, entries).await?;
        state.transcript = memory_messages;

        if let Some(again) = flow.interactive.clone() {
            info!(node_id = %self.node.id, "Resumed tool call waits for user input again");
            state.suspension = Some(InteractiveSuspension::wrap_tool(
                &self.node.id,
                again,
                &tool_call_id,
                state.transcript.clone(),
            ));
            state.dispatches.push(flow);
            return Ok(());
        }

        let response = format_tool_response(flow.tool_response.as_ref());
        if let Some(message) = state
            .transcript
            .iter_mut()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(tool_call_id.as_str()))
        {
            message.content = response.clone();
        }
        self.ctx
            .writer
            .send(SseEvent::tool_response(&tool_call_id, &preview(&response, self.preview_len())))
            .await;

        replay_rounds(self.protocol.as_ref(), &mut state.messages, &state.transcript);

        let paused_call = state
            .transcript
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .find(|c| c.id == tool_call_id)
            .cloned();
        if let Some(call) = paused_call {
            self.push_tool_fragments(state, &call, &response, &flow);
        }
        state.stopped |= flow.tool_stop;
        state.dispatches.push(flow);
        Ok(())
    }

    fn finish(self, state: ToolLoopState, query: String) -> DispatchResult {
        let mut own = self.ctx.services.usage.bill(
            self.node.name.clone(),
            &self.model.id,
            state.input_tokens,
            state.output_tokens,
        );
        if self.ctx.user.external_key {
            own = own.waived();
        }
        let own_points = own.total_points;

        let mut usages = vec![own];
        let mut tool_detail = Vec::new();
        let mut child_points = 0.0;
        for flow in &state.dispatches {
            child_points += flow.total_points();
            usages.extend(flow.usages.iter().cloned());
            tool_detail.extend(flow.node_responses.iter().cloned());
        }

        info!(
            node_id = %self.node.id,
            model_calls = state.iterations.len(),
            input_tokens = state.input_tokens,
            output_tokens = state.output_tokens,
            tool_runs = state.dispatches.len(),
            suspended = state.suspension.is_some(),
            "Tool loop finished"
        );

        let response = NodeResponse {
            node_id: self.node.id.clone(),
            module_name: self.node.name.clone(),
            module_type: self.node.kind.to_string(),
            total_points: own_points,
            model: Some(self.model.id.clone()),
            query: Some(query),
            input_tokens: Some(state.input_tokens),
            output_tokens: Some(state.output_tokens),
            child_total_points: Some(child_points),
            tool_detail,
            tool_stop: state.stopped,
            text_output: Some(state.answer.clone()),
            ..Default::default()
        };

        DispatchResult {
            usages,
            fragments: state.fragments,
            interactive: state.suspension,
            ..DispatchResult::new()
                .output("answerText", state.answer)
                .response(response)
        }
    }
}

/// History minus the paused round, if the caller stored it. The checkpoint
/// transcript stands in for that round's assistant turn.
fn without_paused_round<'h>(histories: &'h [Message], query: &str) -> &'h [Message] {
    match histories {
        [rest @ .., user, assistant]
            if user.role == Role::User && user.content == query && assistant.role == Role::Assistant =>
        {
            rest
        }
        _ => histories,
    }
}

/// Rebuild the model-facing conversation from a transcript.
fn replay_rounds(protocol: &dyn ToolProtocol, messages: &mut Vec<Message>, transcript: &[Message]) {
    let mut i = 0;
    while i < transcript.len() {
        let message = &transcript[i];
        i += 1;
        if !message.has_tool_calls() {
            messages.push(message.clone());
            continue;
        }
        let start = i;
        while i < transcript.len() && transcript[i].role == Role::Tool {
            i += 1;
        }
        protocol.record_round(messages, message, &transcript[start..i]);
    }
}

#[cfg(test)]
pub(crate) fn testing_spec() -> ToolSpec {
    ToolSpec {
        node_id: "getTime".into(),
        name: "Get time".into(),
        intro: "Current time in a city".into(),
        params: vec![ToolParam {
            key: "city".into(),
            value_type: ValueType::String,
            description: "City name".into(),
            required: true,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tool_agent_template, tool_context, tool_context_with, TestContext};
    use skein_core::config::ToolProtocolKind;
    use skein_core::graph::NodeKind;
    use skein_test_utils::{ScriptedLlm, TURN_USAGE};

    fn agent_params() -> NodeParams {
        Map::from_iter([
            ("model".to_string(), json!("test-model")),
            (USER_CHAT_INPUT.to_string(), json!("What time is it in Hangzhou?")),
        ])
    }

    async fn run_agent(protocol: ToolProtocolKind, llm: ScriptedLlm) -> (DispatchResult, TestContext) {
        let test = tool_context(tool_agent_template(), llm, protocol);
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let result = run_tools_node(&test.ctx, &node, agent_params()).await.unwrap();
        (result, test)
    }

    #[test]
    fn definition_from_spec() {
        let def = testing_spec().definition();
        assert_eq!(def.name, "getTime");
        assert_eq!(def.parameters["properties"]["city"]["type"], "string");
        assert_eq!(def.parameters["required"], json!(["city"]));
    }

    #[test]
    fn replay_matches_live_recording() {
        let call = ToolCall {
            id: "c1".into(),
            name: "getTime".into(),
            arguments: "{}".into(),
        };
        let transcript = vec![
            Message::assistant_tool_calls("", vec![call]),
            Message::tool("c1", "getTime", "12:00"),
        ];
        let mut messages = vec![Message::user("q")];
        let protocol = protocol::for_kind(ToolProtocolKind::ToolChoice);
        replay_rounds(protocol.as_ref(), &mut messages, &transcript);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], transcript[1]);
    }

    #[tokio::test]
    async fn tool_choice_round_trip() {
        let llm = ScriptedLlm::new()
            .tool_call("call_1", "getTime", r#"{"city":"Hangzhou"}"#)
            .text("It's 12:00 PM in Hangzhou.");
        let (result, test) = run_agent(ToolProtocolKind::ToolChoice, llm).await;

        assert_eq!(result.outputs["answerText"], json!("It's 12:00 PM in Hangzhou."));
        let response = result.response.unwrap();
        assert!(response.input_tokens.unwrap() > 0);
        assert!(response.output_tokens.unwrap() > 0);
        assert_eq!(response.tool_detail.len(), 1);

        let requests = test.llm.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "2024-05-05T12:00");
        assert!(matches!(requests[0].tools, ToolSchemas::Tools(_)));
    }

    #[tokio::test]
    async fn function_call_keeps_one_call_per_turn() {
        let llm = ScriptedLlm::new()
            .tool_calls(vec![
                ("call_1", "getTime", r#"{"city":"Hangzhou"}"#),
                ("call_2", "getTime", r#"{"city":"Beijing"}"#),
            ])
            .text("Done.");
        let (result, test) = run_agent(ToolProtocolKind::FunctionCall, llm).await;
        assert_eq!(result.response.unwrap().tool_detail.len(), 1);
        let requests = test.llm.requests();
        assert!(matches!(requests[0].tools, ToolSchemas::Functions(_)));
        let tool_messages = requests[1]
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .count();
        assert_eq!(tool_messages, 1);
    }

    #[tokio::test]
    async fn prompt_call_splices_results_into_prompt() {
        let llm = ScriptedLlm::new()
            .text(r#"1: {"toolId": "getTime", "arguments": {"city": "Hangzhou"}}"#)
            .text("0: It's noon.");
        let (result, test) = run_agent(ToolProtocolKind::PromptCall, llm).await;
        assert_eq!(result.outputs["answerText"], json!("It's noon."));

        let requests = test.llm.requests();
        assert!(matches!(requests[0].tools, ToolSchemas::None));
        let prompt = &requests[1].messages.last().unwrap().content;
        assert!(prompt.contains("TOOL_RESPONSE: \"\"\"\n2024-05-05T12:00\n\"\"\"\nANSWER: "));
        assert_eq!(test.sink.answer_text(), "It's noon.");
    }

    #[tokio::test]
    async fn unknown_tools_are_skipped() {
        let llm = ScriptedLlm::new().tool_call("call_1", "deleteEverything", "{}");
        let (result, test) = run_agent(ToolProtocolKind::ToolChoice, llm).await;
        assert_eq!(result.response.unwrap().tool_detail.len(), 0);
        assert_eq!(test.llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let test = tool_context(
            tool_agent_template(),
            ScriptedLlm::new().text(""),
            ToolProtocolKind::ToolChoice,
        );
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let err = run_tools_node(&test.ctx, &node, agent_params()).await.unwrap_err();
        assert!(matches!(err, SkeinError::LlmParse(_)));
    }

    #[tokio::test]
    async fn iteration_limit_is_fail_open() {
        let mut llm = ScriptedLlm::new();
        for i in 0..5 {
            llm = llm.tool_call(&format!("call_{i}"), "getTime", r#"{"city":"Hangzhou"}"#);
        }
        let mut config = skein_test_utils::test_config(ToolProtocolKind::ToolChoice);
        config.engine.max_tool_iterations = 2;
        let test = tool_context_with(tool_agent_template(), llm, config);
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let result = run_tools_node(&test.ctx, &node, agent_params()).await.unwrap();

        assert_eq!(result.response.unwrap().tool_detail.len(), 2);
        assert_eq!(test.llm.requests().len(), 2);
        assert_eq!(result.outputs["answerText"], json!(""));
    }

    #[tokio::test]
    async fn stop_tool_ends_loop_after_round() {
        let mut template = tool_agent_template();
        if let Some(clock) = template.nodes.iter_mut().find(|n| n.id == "getTime") {
            clock.kind = NodeKind::StopTool;
        }
        let llm = ScriptedLlm::new()
            .tool_call("call_1", "getTime", r#"{"city":"Hangzhou"}"#)
            .text("never asked for");
        let test = tool_context(template, llm, ToolProtocolKind::ToolChoice);
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let result = run_tools_node(&test.ctx, &node, agent_params()).await.unwrap();

        let response = result.response.unwrap();
        assert!(response.tool_stop);
        assert_eq!(response.tool_detail.len(), 1);
        assert!(response.tool_detail[0].tool_stop);
        assert_eq!(test.llm.requests().len(), 1);
        assert_eq!(test.llm.remaining_turns(), 1);
    }

    #[tokio::test]
    async fn token_totals_sum_reported_and_counted_turns() {
        // First turn arrives without usage, so the counter fills it in.
        let llm = ScriptedLlm::new()
            .turn(vec![
                StreamDelta::ToolCallStart {
                    index: 0,
                    id: "call_1".into(),
                    name: "getTime".into(),
                },
                StreamDelta::ToolArgsDelta {
                    index: 0,
                    delta: r#"{"city":"Hangzhou"}"#.into(),
                },
                StreamDelta::Stop(StopReason::ToolUse),
            ])
            .text("It's noon.");
        let test = tool_context(tool_agent_template(), llm, ToolProtocolKind::ToolChoice);
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let model = test.ctx.config().model("test-model").unwrap().clone();
        let tools: Vec<ToolSpec> = test.ctx.graph.read(|g| {
            g.tool_node_ids("agent")
                .iter()
                .filter_map(|id| g.node(id))
                .map(ToolSpec::from_node)
                .collect()
        });
        let tool_loop = ToolLoop::new(&test.ctx, &node, &model, tools);
        let mut state = ToolLoopState::new(vec![Message::user("What time is it in Hangzhou?")], 30);
        tool_loop.run(&mut state).await.unwrap();

        // One message and one tool schema at 10 tokens each; one reply message.
        assert_eq!(
            state.iterations,
            vec![
                Usage {
                    prompt_tokens: 20,
                    completion_tokens: 10,
                },
                TURN_USAGE,
            ]
        );
        let prompt: u64 = state.iterations.iter().map(|u| u.prompt_tokens).sum();
        let completion: u64 = state.iterations.iter().map(|u| u.completion_tokens).sum();
        assert_eq!(state.input_tokens, prompt);
        assert_eq!(state.output_tokens, completion);
    }
}
