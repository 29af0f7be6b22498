use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use skein_core::error::Result;
use skein_core::graph::NodeKind;

use crate::context::ExecutionContext;
use crate::dispatch::{DispatchResult, NodeParams};
use crate::graph::RuntimeNode;

/// Business logic for one node kind.
///
/// `node` is a snapshot taken when the node was dispatched; `params` are its
/// bound inputs coerced to their declared types.
pub trait NodeHandler: Send + Sync + 'static {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a RuntimeNode,
        params: NodeParams,
    ) -> BoxFuture<'a, Result<DispatchResult>>;
}

/// Node kind to handler lookup, resolved once when a graph is loaded.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in generic handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry);
        registry
    }

    /// Register a handler, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_generic_kinds() {
        let registry = HandlerRegistry::with_builtins();
        for kind in [
            NodeKind::WorkflowStart,
            NodeKind::Answer,
            NodeKind::ChatNode,
            NodeKind::Tools,
            NodeKind::StopTool,
            NodeKind::UserSelect,
        ] {
            assert!(registry.contains(kind), "missing {kind}");
        }
        assert!(!registry.contains(NodeKind::HttpRequest));
        assert!(!HandlerRegistry::new().contains(NodeKind::Answer));
    }
}
