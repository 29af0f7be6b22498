use serde::Serialize;
use serde_json::{Map, Value};

use skein_core::suspension::InteractiveSuspension;

use crate::usage::{total_points, UsageEntry};

/// Coerced input values handed to a node handler, keyed by input key.
pub type NodeParams = Map<String, Value>;

/// Typed lookups on [`NodeParams`].
pub trait ParamsExt {
    fn str_param(&self, key: &str) -> Option<&str>;
    fn u64_param(&self, key: &str) -> Option<u64>;
    fn bool_param(&self, key: &str) -> Option<bool>;
}

impl ParamsExt for NodeParams {
    fn str_param(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn u64_param(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        })
    }

    fn bool_param(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

/// Output the end user sees as part of the assistant's reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssistantFragment {
    Text {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Tool {
        id: String,
        tool_name: String,
        function_name: String,
        params: String,
        response: String,
    },
}

/// Log record for one node dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    pub node_id: String,
    pub module_name: String,
    pub module_type: String,
    /// Seconds.
    pub running_time: f64,
    pub total_points: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_total_points: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_detail: Vec<NodeResponse>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tool_stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_output: Option<String>,
}

/// What a node handler produced.
#[derive(Debug, Default)]
pub struct DispatchResult {
    pub outputs: Map<String, Value>,
    pub response: Option<NodeResponse>,
    pub usages: Vec<UsageEntry>,
    pub fragments: Vec<AssistantFragment>,
    /// Raw payload returned to a calling tool loop.
    pub tool_response: Option<Value>,
    pub interactive: Option<InteractiveSuspension>,
    /// Ask the calling tool loop to stop after this round.
    pub tool_stop: bool,
}

impl DispatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn response(mut self, response: NodeResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn text(mut self, content: impl Into<String>) -> Self {
        push_fragment(
            &mut self.fragments,
            AssistantFragment::Text {
                content: content.into(),
            },
        );
        self
    }
}

/// Aggregate of every dispatch made by one `Scheduler::run` call.
#[derive(Debug, Default, Clone)]
pub struct FlowResponse {
    pub node_responses: Vec<NodeResponse>,
    pub usages: Vec<UsageEntry>,
    /// Consecutive text fragments are merged.
    pub fragments: Vec<AssistantFragment>,
    /// Last non-empty tool payload.
    pub tool_response: Option<Value>,
    pub interactive: Option<InteractiveSuspension>,
    pub tool_stop: bool,
    pub dispatch_count: usize,
}

impl FlowResponse {
    pub fn record(&mut self, result: DispatchResult) {
        self.dispatch_count += 1;
        if let Some(response) = result.response {
            self.node_responses.push(response);
        }
        self.usages.extend(result.usages);
        for fragment in result.fragments {
            push_fragment(&mut self.fragments, fragment);
        }
        if let Some(payload) = result.tool_response.filter(|v| !is_empty_payload(v)) {
            self.tool_response = Some(payload);
        }
        if let Some(interactive) = result.interactive {
            self.interactive = Some(interactive);
        }
        self.tool_stop |= result.tool_stop;
    }

    pub fn total_points(&self) -> f64 {
        total_points(&self.usages)
    }

    /// Text fragments joined in order.
    pub fn answer_text(&self) -> String {
        answer_text(&self.fragments)
    }
}

pub fn push_fragment(fragments: &mut Vec<AssistantFragment>, fragment: AssistantFragment) {
    if let (
        Some(AssistantFragment::Text { content: last }),
        AssistantFragment::Text { content },
    ) = (fragments.last_mut(), &fragment)
    {
        last.push_str(content);
        return;
    }
    fragments.push(fragment);
}

pub fn answer_text(fragments: &[AssistantFragment]) -> String {
    fragments
        .iter()
        .filter_map(|f| match f {
            AssistantFragment::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
