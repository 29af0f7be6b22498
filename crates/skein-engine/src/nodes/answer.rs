use futures::future::BoxFuture;

use skein_core::error::Result;
use skein_core::event::SseEvent;

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams, NodeResponse, ParamsExt};
use crate::graph::RuntimeNode;
use crate::handler::NodeHandler;

/// Streams a fixed (variable-substituted) text to the user.
pub struct AnswerHandler;

impl NodeHandler for AnswerHandler {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(async move {
            let text = params.str_param("text").unwrap_or_default().to_string();
            if !text.is_empty() {
                ctx.writer.send(SseEvent::answer(&text)).await;
            }
            Ok(DispatchResult::new()
                .text(text.clone())
                .response(NodeResponse {
                    node_id: node.id.clone(),
                    module_name: node.name.clone(),
                    module_type: node.kind.to_string(),
                    text_output: Some(text),
                    ..Default::default()
                }))
        })
    }
}
