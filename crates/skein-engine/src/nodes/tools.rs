use futures::future::BoxFuture;

use skein_core::error::Result;

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams};
use crate::graph::RuntimeNode;
use crate::handler::NodeHandler;
use crate::tool_engine::run_tools_node;

/// Runs the agentic tool loop.
pub struct ToolsHandler;

impl NodeHandler for ToolsHandler {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>> {
        Box::pin(run_tools_node(ctx, node, params))
    }
}
