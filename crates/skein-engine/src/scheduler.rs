use std::collections::HashMap;
use std::time::Instant;

use futures::future::{try_join_all, BoxFuture};
use tracing::{debug, error, info, warn};

use skein_core::error::{Result, SkeinError};
use skein_core::event::SseEvent;

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, FlowResponse, NodeParams};
use crate::graph::RuntimeNode;

/// Push-based executor over the shared runtime graph.
pub struct Scheduler;

impl Scheduler {
    /// Dispatch `entry_ids`, then every node their outputs make ready, until
    /// nothing is runnable, the run budget is spent, the sink closes or a
    /// node asks for human input.
    ///
    /// Nodes ready in the same step run concurrently. A handler error aborts
    /// the whole call.
    pub fn run<'a>(
        ctx: &'a ExecutionContext,
        entry_ids: Vec<String>,
    ) -> BoxFuture<'a, Result<FlowResponse>> {
        Box::pin(async move {
            let mut flow = FlowResponse::default();
            let max_depth = ctx.config().engine.max_nesting_depth;
            if ctx.depth > max_depth {
                warn!(depth = ctx.depth, max_depth, "Nesting too deep, skipping sub-graph");
                return Ok(flow);
            }

            let mut last_params: HashMap<String, NodeParams> = HashMap::new();
            let mut frontier = dedup(entry_ids);

            while !frontier.is_empty() {
                if ctx.writer.is_closed() {
                    debug!(depth = ctx.depth, "Sink closed, stopping dispatch");
                    break;
                }

                // Snapshot and arm every ready node before the first await so
                // concurrent tool calls on the shared graph cannot interleave.
                let mut ready: Vec<(RuntimeNode, NodeParams)> = Vec::new();
                for id in &frontier {
                    let Some((node, params)) = ctx.graph.write(|g| g.prepare_dispatch(id)) else {
                        continue;
                    };
                    if last_params.get(id) == Some(&params) {
                        debug!(node_id = %id, "Inputs unchanged, not re-dispatching");
                        continue;
                    }
                    ready.push((node, params));
                }

                let mut halted = false;
                let mut admitted = Vec::with_capacity(ready.len());
                for entry in ready {
                    if ctx.budget.try_acquire() {
                        admitted.push(entry);
                    } else {
                        info!(node_id = %entry.0.id, "Run budget spent, halting");
                        halted = true;
                        break;
                    }
                }

                let results = try_join_all(
                    admitted
                        .iter()
                        .map(|(node, params)| dispatch_node(ctx, node, params.clone())),
                )
                .await?;

                let mut next = Vec::new();
                let mut interactive = false;
                for ((node, params), mut result) in admitted.into_iter().zip(results) {
                    let targets = ctx
                        .graph
                        .write(|g| g.apply_outputs(&node.id, &mut result.outputs));
                    if let Some(request) = result.interactive.as_mut() {
                        interactive = true;
                        if request.is_entry(&node.id) {
                            request
                                .entry_inputs
                                .entry(node.id.clone())
                                .or_insert_with(|| params.clone());
                        }
                    }
                    for target in targets {
                        if !next.contains(&target) {
                            next.push(target);
                        }
                    }
                    last_params.insert(node.id.clone(), params);
                    flow.record(result);
                }

                if halted || interactive {
                    break;
                }
                frontier = next;
            }

            debug!(
                depth = ctx.depth,
                dispatched = flow.dispatch_count,
                budget_left = ctx.budget.remaining(),
                "Scheduler run finished"
            );
            Ok(flow)
        })
    }
}

async fn dispatch_node(
    ctx: &ExecutionContext,
    node: &RuntimeNode,
    params: NodeParams,
) -> Result<DispatchResult> {
    let handler = ctx
        .services
        .registry
        .get(node.kind)
        .ok_or_else(|| SkeinError::MissingHandler(node.kind.to_string()))?;

    if node.show_status {
        ctx.writer.send(SseEvent::node_status(&node.name)).await;
    }

    debug!(node_id = %node.id, kind = %node.kind, depth = ctx.depth, "Dispatching node");
    let start = Instant::now();
    let mut result = handler.dispatch(ctx, node, params).await.map_err(|e| {
        error!(node_id = %node.id, kind = %node.kind, error = %e, "Node failed");
        e
    })?;
    if let Some(response) = result.response.as_mut() {
        response.running_time = start.elapsed().as_secs_f64();
    }
    Ok(result)
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
