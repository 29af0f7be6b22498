use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use skein_core::config::EngineConfig;
use skein_core::suspension::{InteractiveSuspension, ToolCheckpoint};
use skein_core::traits::{LlmClient, TokenCounter};
use skein_core::types::Message;

use crate::graph::SharedGraph;
use crate::handler::HandlerRegistry;
use crate::stream::StreamWriter;
use crate::usage::UsageAccumulator;

/// Long-lived collaborators shared by every run of an engine.
pub struct Services {
    pub config: EngineConfig,
    pub llm: Arc<dyn LlmClient>,
    pub tokens: Arc<dyn TokenCounter>,
    pub registry: HandlerRegistry,
    pub usage: UsageAccumulator,
}

/// Who a run is for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunUser {
    #[serde(default)]
    pub id: String,
    /// Whole hours east of UTC, used for the `cTime` variable.
    #[serde(default)]
    pub utc_offset_hours: i32,
    /// The user supplied their own provider key; model calls are not billed
    /// and provider errors are shown verbatim.
    #[serde(default)]
    pub external_key: bool,
}

/// Node dispatches left for a top-level run, shared with every nested run.
#[derive(Debug, Clone)]
pub struct RunBudget(Arc<AtomicI64>);

impl RunBudget {
    pub fn new(limit: u32) -> Self {
        Self(Arc::new(AtomicI64::new(i64::from(limit))))
    }

    /// Take one dispatch from the budget. False once it is spent.
    pub fn try_acquire(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                (left > 0).then(|| left - 1)
            })
            .is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.0.load(Ordering::Acquire).clamp(0, i64::from(u32::MAX)) as u32
    }
}

#[derive(Debug, Default)]
struct ResumeCursor {
    level: Option<InteractiveSuspension>,
    reply_taken: bool,
}

/// A stored suspension being unwound together with the human reply.
///
/// Each tools node on the path takes its checkpoint in turn, moving the
/// cursor one level down; the node that raised the request then takes the
/// reply. Both can be taken only once.
#[derive(Debug)]
pub struct ResumeState {
    reply: String,
    cursor: Mutex<ResumeCursor>,
}

impl ResumeState {
    pub fn new(suspension: InteractiveSuspension, reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            cursor: Mutex::new(ResumeCursor {
                level: Some(suspension),
                reply_taken: false,
            }),
        }
    }

    /// The tool checkpoint for `node_id`, if the current level pauses there.
    pub fn take_tool_checkpoint(&self, node_id: &str) -> Option<ToolCheckpoint> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let level = cursor.level.as_mut()?;
        if !level.is_entry(node_id) || level.tool.is_none() {
            return None;
        }
        let checkpoint = *level.tool.take()?;
        cursor.level = Some(checkpoint.inner.clone());
        Some(checkpoint)
    }

    /// The human reply, for the node that raised the request.
    pub fn take_reply(&self, node_id: &str) -> Option<String> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if cursor.reply_taken {
            return None;
        }
        let level = cursor.level.as_ref()?;
        if level.tool.is_some() || !level.is_entry(node_id) {
            return None;
        }
        cursor.reply_taken = true;
        Some(self.reply.clone())
    }
}

/// Everything a node handler can see while it runs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub services: Arc<Services>,
    pub graph: SharedGraph,
    pub writer: StreamWriter,
    pub budget: RunBudget,
    pub histories: Arc<Vec<Message>>,
    pub variables: Arc<Map<String, Value>>,
    pub query: String,
    pub user: RunUser,
    /// 0 for the top-level run, +1 per tool call.
    pub depth: usize,
    /// Ask model calls to stream their output.
    pub stream: bool,
    pub resume: Option<Arc<ResumeState>>,
}

impl ExecutionContext {
    /// Context for a sub-graph run started by a tool call.
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn take_reply(&self, node_id: &str) -> Option<String> {
        self.resume.as_ref()?.take_reply(node_id)
    }

    pub fn take_tool_checkpoint(&self, node_id: &str) -> Option<ToolCheckpoint> {
        self.resume.as_ref()?.take_tool_checkpoint(node_id)
    }
}
