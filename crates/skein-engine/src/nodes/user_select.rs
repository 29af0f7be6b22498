use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use skein_core::error::Result;
use skein_core::suspension::{InteractivePrompt, InteractiveSuspension};

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams, NodeResponse, ParamsExt};
use crate::graph::RuntimeNode;
use crate::handler::NodeHandler;

/// Output carrying the human's reply.
pub const SELECT_RESULT: &str = "selectResult";

/// Pauses the run until a human picks an option (or types a reply when no
/// options are configured).
pub struct UserSelectHandler;

impl NodeHandler for UserSelectHandler {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(async move {
            let response = NodeResponse {
                node_id: node.id.clone(),
                module_name: node.name.clone(),
                module_type: node.kind.to_string(),
                ..Default::default()
            };

            if let Some(reply) = ctx.take_reply(&node.id) {
                debug!(node_id = %node.id, "Received user reply");
                return Ok(DispatchResult {
                    tool_response: Some(Value::String(reply.clone())),
                    ..DispatchResult::new()
                        .output(SELECT_RESULT, reply.clone())
                        .response(NodeResponse {
                            text_output: Some(reply),
                            ..response
                        })
                });
            }

            let description = params.str_param("description").unwrap_or_default().to_string();
            let options: Vec<String> = params
                .get("userSelectOptions")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            Value::Object(o) => o
                                .get("value")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            other => other.to_string(),
                        })
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let prompt = if options.is_empty() {
                InteractivePrompt::UserInput { description }
            } else {
                InteractivePrompt::UserSelect {
                    description,
                    options,
                }
            };
            debug!(node_id = %node.id, "Waiting for user input");
            Ok(DispatchResult {
                interactive: Some(InteractiveSuspension::new(vec![node.id.clone()], prompt)),
                ..DispatchResult::new().response(response)
            })
        })
    }
}
