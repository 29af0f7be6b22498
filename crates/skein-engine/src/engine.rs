use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info};

use skein_core::config::EngineConfig;
use skein_core::error::Result;
use skein_core::event::SseEvent;
use skein_core::graph::{GraphTemplate, NodeKind, USER_CHAT_INPUT};
use skein_core::suspension::InteractiveSuspension;
use skein_core::traits::{EventSink, LlmClient, TokenCounter};
use skein_core::types::Message;

use crate::context::{ExecutionContext, ResumeState, RunBudget, RunUser, Services};
use crate::dispatch::FlowResponse;
use crate::graph::{load, system_variables, SharedGraph};
use crate::handler::{HandlerRegistry, NodeHandler};
use crate::scheduler::Scheduler;
use crate::stream::StreamWriter;
use crate::usage::UsageAccumulator;

/// One top-level run: a fresh question, or the reply to a paused run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub template: GraphTemplate,
    pub query: String,
    pub histories: Vec<Message>,
    /// Caller variables; they override the engine's system variables.
    pub variables: Map<String, Value>,
    pub user: RunUser,
    pub resume: Option<(InteractiveSuspension, String)>,
    /// Overrides `engine.detail`.
    pub detail: Option<bool>,
    pub stream: bool,
    /// Overrides `engine.max_run_times`.
    pub max_run_times: Option<u32>,
}

impl RunRequest {
    pub fn new(template: GraphTemplate, query: impl Into<String>) -> Self {
        Self {
            template,
            query: query.into(),
            histories: Vec::new(),
            variables: Map::new(),
            user: RunUser::default(),
            resume: None,
            detail: None,
            stream: true,
            max_run_times: None,
        }
    }

    /// Continue a paused run with the human's reply.
    pub fn resume(mut self, suspension: InteractiveSuspension, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        self.query = reply.clone();
        self.resume = Some((suspension, reply));
        self
    }

    pub fn histories(mut self, histories: Vec<Message>) -> Self {
        self.histories = histories;
        self
    }

    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn user(mut self, user: RunUser) -> Self {
        self.user = user;
        self
    }

    pub fn detail(mut self, detail: bool) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn max_run_times(mut self, limit: u32) -> Self {
        self.max_run_times = Some(limit);
        self
    }
}

/// How a run ended.
#[derive(Debug)]
pub struct RunOutcome {
    pub flow: FlowResponse,
    /// Set when the run paused for human input. Persist it and pass it back
    /// with [`RunRequest::resume`].
    pub suspension: Option<InteractiveSuspension>,
    pub budget_left: u32,
}

impl RunOutcome {
    pub fn answer_text(&self) -> String {
        self.flow.answer_text()
    }
}

pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    llm: Arc<dyn LlmClient>,
    tokens: Arc<dyn TokenCounter>,
    registry: HandlerRegistry,
}

impl WorkflowEngineBuilder {
    /// Register the handler for a node kind, replacing any built-in one.
    pub fn handler(mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) -> Self {
        self.registry.register(kind, handler);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let usage = UsageAccumulator::from_config(&self.config);
        WorkflowEngine {
            services: Arc::new(Services {
                config: self.config,
                llm: self.llm,
                tokens: self.tokens,
                registry: self.registry,
                usage,
            }),
        }
    }
}

/// Runs workflow graphs against one model configuration and handler set.
pub struct WorkflowEngine {
    services: Arc<Services>,
}

impl WorkflowEngine {
    pub fn builder(
        config: EngineConfig,
        llm: Arc<dyn LlmClient>,
        tokens: Arc<dyn TokenCounter>,
    ) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            config,
            llm,
            tokens,
            registry: HandlerRegistry::with_builtins(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Check that a template loads: unique ids, valid edges, a handler for
    /// every node kind.
    pub fn validate(&self, template: &GraphTemplate) -> Result<()> {
        load(template, &Map::new(), &self.services.registry).map(|_| ())
    }

    /// Run a graph, writing frames to `sink`.
    ///
    /// A failed run also writes an `error` frame before the error is returned.
    pub async fn run(&self, request: RunRequest, sink: Arc<dyn EventSink>) -> Result<RunOutcome> {
        let detail = request.detail.unwrap_or(self.services.config.engine.detail);
        let writer = StreamWriter::new(sink, detail);
        let external_key = request.user.external_key;

        match self.execute(request, &writer).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "Workflow run failed");
                writer.send(SseEvent::error(&e.user_message(external_key))).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, request: RunRequest, writer: &StreamWriter) -> Result<RunOutcome> {
        let mut variables = system_variables(&request.user, Utc::now());
        variables.extend(request.variables);

        let mut graph = load(&request.template, &variables, &self.services.registry)?;
        let (entries, resume) = match request.resume {
            Some((suspension, reply)) => {
                let entries = suspension.entry_node_ids.clone();
                graph.set_entries(&entries);
                for (id, inputs) in &suspension.entry_inputs {
                    graph.bind_inputs(id, inputs);
                }
                info!(
                    entries = ?entries,
                    depth = suspension.depth(),
                    "Resuming paused run"
                );
                (entries, Some(Arc::new(ResumeState::new(suspension, reply))))
            }
            None => {
                let entries = graph.entry_ids();
                for id in &entries {
                    if let Some(node) = graph.node_mut(id) {
                        node.bind(USER_CHAT_INPUT, Value::String(request.query.clone()));
                    }
                }
                (entries, None)
            }
        };

        let budget = RunBudget::new(
            request
                .max_run_times
                .unwrap_or(self.services.config.engine.max_run_times),
        );
        let ctx = ExecutionContext {
            services: self.services.clone(),
            graph: SharedGraph::new(graph),
            writer: writer.clone(),
            budget: budget.clone(),
            histories: Arc::new(request.histories),
            variables: Arc::new(variables),
            query: request.query,
            user: request.user,
            depth: 0,
            stream: request.stream,
            resume,
        };

        let flow = Scheduler::run(&ctx, entries).await?;
        let suspension = flow.interactive.clone();

        if let Some(suspension) = &suspension {
            writer
                .send(SseEvent::interactive(serde_json::to_value(&suspension.prompt)?))
                .await;
        }
        writer.send(SseEvent::answer_finish()).await;
        if writer.detail() {
            writer
                .send(SseEvent::flow_responses(serde_json::to_value(&flow.node_responses)?))
                .await;
        }

        info!(
            dispatched = flow.dispatch_count,
            budget_left = budget.remaining(),
            total_points = flow.total_points(),
            paused = suspension.is_some(),
            "Workflow run finished"
        );
        Ok(RunOutcome {
            flow,
            suspension,
            budget_left: budget.remaining(),
        })
    }
}
