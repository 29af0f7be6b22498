use futures::future::BoxFuture;
use serde_json::Value;

use skein_core::error::Result;
use skein_core::graph::USER_CHAT_INPUT;

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams, NodeResponse};
use crate::graph::RuntimeNode;
use crate::handler::NodeHandler;

/// Emits the user's query.
pub struct StartHandler;

impl NodeHandler for StartHandler {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(async move {
            let query = match params.get(USER_CHAT_INPUT) {
                Some(Value::String(text)) => text.clone(),
                _ => ctx.query.clone(),
            };
            Ok(DispatchResult::new()
                .output(USER_CHAT_INPUT, query)
                .response(NodeResponse {
                    node_id: node.id.clone(),
                    module_name: node.name.clone(),
                    module_type: node.kind.to_string(),
                    ..Default::default()
                }))
        })
    }
}
