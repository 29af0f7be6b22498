use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, info};

use skein_core::error::{Result, SkeinError};
use skein_core::event::SseEvent;
use skein_core::graph::USER_CHAT_INPUT;
use skein_core::types::*;

use super::{compose_system_prompt, recent_history};
use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams, NodeResponse, ParamsExt};
use crate::graph::RuntimeNode;
use crate::handler::NodeHandler;
use crate::tool_engine::truncate::fit_to_context;

/// One plain chat completion, streamed to the user.
pub struct ChatHandler;

impl NodeHandler for ChatHandler {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(run_chat(ctx, node, params))
    }
}

async fn run_chat(
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
    let model = ctx.config().model(model_id)?;
    let query = params.str_param(USER_CHAT_INPUT).unwrap_or_default().to_string();
    let history = params.u64_param("history").unwrap_or(6) as usize;

    let mut messages = Vec::new();
    if let Some(system) = compose_system_prompt(
        model.default_system_prompt.as_deref(),
        params.str_param("systemPrompt"),
    ) {
        messages.push(Message::system(system));
    }
    messages.extend(recent_history(&ctx.histories, history));
    messages.push(Message::user(query.clone()));
    fit_to_context(
        &mut messages,
        ctx.services.tokens.as_ref(),
        None,
        model
            .max_context
            .saturating_sub(ctx.config().engine.context_reserve),
    );

    let request = CompletionRequest {
        messages: messages.clone(),
        tools: ToolSchemas::None,
        stream: ctx.stream,
        temperature: params
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map(|t| t as f32),
    };

    let mut text = String::new();
    let mut usage = None;
    match ctx.services.llm.complete(model, request).await? {
        Completion::Complete(response) => {
            text = response.content;
            usage = response.usage;
            if !text.is_empty() {
                ctx.writer.send(SseEvent::answer(&text)).await;
            }
        }
        Completion::Stream(mut stream) => {
            while let Some(delta) = stream.next().await {
                match delta? {
                    StreamDelta::TextDelta(chunk) => {
                        ctx.writer.send(SseEvent::answer(&chunk)).await;
                        text.push_str(&chunk);
                    }
                    StreamDelta::Usage(u) => usage = Some(u),
                    _ => {}
                }
                if ctx.writer.is_closed() {
                    debug!(node_id = %node.id, "Sink closed mid-stream");
                    break;
                }
            }
        }
    }

    if text.trim().is_empty() && !ctx.writer.is_closed() {
        return Err(SkeinError::LlmParse("LLM api response empty".into()));
    }

    let usage = usage.unwrap_or_else(|| {
        let counter = ctx.services.tokens.as_ref();
        Usage {
            prompt_tokens: counter.count(&messages, None) as u64,
            completion_tokens: counter.count(&[Message::assistant(text.clone())], None) as u64,
        }
    });
    let mut entry = ctx.services.usage.bill(
        node.name.clone(),
        &model.id,
        usage.prompt_tokens,
        usage.completion_tokens,
    );
    if ctx.user.external_key {
        entry = entry.waived();
    }

    info!(
        node_id = %node.id,
        model = %model.id,
        input_tokens = usage.prompt_tokens,
        output_tokens = usage.completion_tokens,
        "Chat completion finished"
    );

    let response = NodeResponse {
        node_id: node.id.clone(),
        module_name: node.name.clone(),
        module_type: node.kind.to_string(),
        total_points: entry.total_points,
        model: Some(model.id.clone()),
        query: Some(query),
        input_tokens: Some(usage.prompt_tokens),
        output_tokens: Some(usage.completion_tokens),
        text_output: Some(text.clone()),
        ..Default::default()
    };

    Ok(DispatchResult {
        usages: vec![entry],
        ..DispatchResult::new()
            .output("answerText", text.clone())
            .text(text)
            .response(response)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tool_context, tool_agent_template};
    use serde_json::json;
    use skein_core::config::ToolProtocolKind;
    use skein_test_utils::ScriptedLlm;

    fn params() -> NodeParams {
        serde_json::from_value(json!({
            "model": "test-model",
            "systemPrompt": "Be brief.",
            "userChatInput": "Hi",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn streams_and_bills() {
        let test = tool_context(
            tool_agent_template(),
            ScriptedLlm::new().text("Hello there"),
            ToolProtocolKind::ToolChoice,
        );
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let result = ChatHandler.dispatch(&test.ctx, &node, params()).await.unwrap();

        assert_eq!(result.outputs["answerText"], json!("Hello there"));
        assert_eq!(test.sink.answer_text(), "Hello there");
        assert_eq!(result.usages.len(), 1);
        assert!(result.usages[0].total_points > 0.0);

        let request = &test.llm.requests()[0];
        assert_eq!(request.messages[0], Message::system("Be brief."));
        assert_eq!(request.messages[1], Message::user("Hi"));
    }

    #[tokio::test]
    async fn external_key_is_not_billed() {
        let mut test = tool_context(
            tool_agent_template(),
            ScriptedLlm::new().text("Hello"),
            ToolProtocolKind::ToolChoice,
        );
        test.ctx.user.external_key = true;
        let node = test.ctx.graph.read(|g| g.node("agent").cloned()).unwrap();
        let result = ChatHandler.dispatch(&test.ctx, &node, params()).await.unwrap();
        assert_eq!(result.usages[0].total_points, 0.0);
    }
}
