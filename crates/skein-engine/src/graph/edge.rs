use skein_core::graph::{EdgeTemplate, SELECTED_TOOLS_HANDLE};

/// A directed binding from one node's output to another node's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEdge {
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
    /// Inactive edges never carry values.
    pub active: bool,
}

impl RuntimeEdge {
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        let source_handle = source_handle.into();
        Self {
            active: source_handle != SELECTED_TOOLS_HANDLE,
            source: source.into(),
            source_handle,
            target: target.into(),
            target_handle: target_handle.into(),
        }
    }

    /// Edge that registers `target` as a tool of `source`.
    pub fn is_tool_selection(&self) -> bool {
        self.source_handle == SELECTED_TOOLS_HANDLE
    }
}

impl From<&EdgeTemplate> for RuntimeEdge {
    fn from(t: &EdgeTemplate) -> Self {
        Self::new(&t.source, &t.source_handle, &t.target, &t.target_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_selection_edges_are_inactive() {
        let edge = RuntimeEdge::new("agent", SELECTED_TOOLS_HANDLE, "getTime", SELECTED_TOOLS_HANDLE);
        assert!(edge.is_tool_selection());
        assert!(!edge.active);

        let data = RuntimeEdge::new("start", "userChatInput", "agent", "userChatInput");
        assert!(data.active);
    }
}
