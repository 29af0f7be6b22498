use futures::future::BoxFuture;

use skein_core::error::Result;

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams, NodeResponse};
use crate::graph::RuntimeNode;
use crate::handler::NodeHandler;

/// Ends the calling tool loop after the current round.
pub struct StopToolHandler;

impl NodeHandler for StopToolHandler {
    fn dispatch<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        _params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(async move {
            Ok(DispatchResult {
                tool_stop: true,
                ..DispatchResult::new().response(NodeResponse {
                    node_id: node.id.clone(),
                    module_name: node.name.clone(),
                    module_type: node.kind.to_string(),
                    tool_stop: true,
                    ..Default::default()
                })
            })
        })
    }
}
