//! Mocks and fixtures shared by the skein test suites.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Notify;

use skein_core::config::{EngineConfig, ModelConfig, ToolProtocolKind};
use skein_core::error::{Result, SkeinError};
use skein_core::traits::{EventSink, LlmClient, TokenCounter};
use skein_core::types::*;

/// Usage reported with every scripted turn.
pub const TURN_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
};

/// Longest text chunk a scripted turn streams at once.
const CHUNK_CHARS: usize = 4;

/// An LLM that replays scripted turns in order and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    turns: Mutex<VecDeque<Vec<StreamDelta>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A turn made of raw deltas, sent as given.
    pub fn turn(self, deltas: Vec<StreamDelta>) -> Self {
        self.turns.lock().unwrap().push_back(deltas);
        self
    }

    /// A plain text answer, streamed in small chunks.
    pub fn text(self, text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut deltas: Vec<StreamDelta> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| StreamDelta::TextDelta(c.iter().collect()))
            .collect();
        deltas.push(StreamDelta::Usage(TURN_USAGE));
        deltas.push(StreamDelta::Stop(StopReason::EndTurn));
        self.turn(deltas)
    }

    pub fn tool_call(self, id: &str, name: &str, arguments: &str) -> Self {
        self.tool_calls(vec![(id, name, arguments)])
    }

    /// One turn requesting several tool calls.
    pub fn tool_calls(self, calls: Vec<(&str, &str, &str)>) -> Self {
        let mut deltas = Vec::new();
        for (index, (id, name, arguments)) in calls.into_iter().enumerate() {
            deltas.push(StreamDelta::ToolCallStart {
                index,
                id: id.to_string(),
                name: name.to_string(),
            });
            deltas.push(StreamDelta::ToolArgsDelta {
                index,
                delta: arguments.to_string(),
            });
        }
        deltas.push(StreamDelta::Usage(TURN_USAGE));
        deltas.push(StreamDelta::Stop(StopReason::ToolUse));
        self.turn(deltas)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Stream items consumed so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(
        &self,
        _config: &ModelConfig,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<Completion<'_>>> {
        Box::pin(async move {
            let stream = request.stream;
            self.requests.lock().unwrap().push(request);
            let deltas = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SkeinError::LlmRequest("script exhausted".into()))?;

            if !stream {
                return Ok(Completion::Complete(aggregate(deltas)));
            }
            let reads = self.reads.clone();
            let stream = futures::stream::iter(deltas.into_iter().map(Ok))
                .inspect(move |_| {
                    reads.fetch_add(1, Ordering::SeqCst);
                })
                .boxed();
            Ok(Completion::Stream(stream))
        })
    }
}

fn aggregate(deltas: Vec<StreamDelta>) -> CompleteResponse {
    let mut response = CompleteResponse::default();
    for delta in deltas {
        match delta {
            StreamDelta::TextDelta(text) => response.content.push_str(&text),
            StreamDelta::ToolCallStart { id, name, .. } => response.tool_calls.push(ToolCall {
                id,
                name,
                arguments: String::new(),
            }),
            StreamDelta::ToolArgsDelta { index, delta } => {
                if let Some(call) = response.tool_calls.get_mut(index) {
                    call.arguments.push_str(&delta);
                }
            }
            StreamDelta::Usage(usage) => response.usage = Some(usage),
            StreamDelta::Stop(_) => {}
        }
    }
    response
}

type Frame = (Option<String>, String);

/// A sink that keeps every frame it is given.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
    closed: AtomicBool,
    close_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose consumer goes away after `frames` frames.
    pub fn closing_after(frames: usize) -> Self {
        Self {
            close_after: Some(frames),
            ..Self::default()
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Parsed payloads of the frames named `event`.
    pub fn events(&self, event: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|(name, _)| name.as_deref() == Some(event))
            .filter_map(|(_, data)| serde_json::from_str(&data).ok())
            .collect()
    }

    /// Concatenated answer text, whether or not frames were named.
    pub fn answer_text(&self) -> String {
        self.frames()
            .into_iter()
            .filter(|(name, _)| name.as_deref().map_or(true, |n| n == "answer"))
            .filter_map(|(_, data)| serde_json::from_str::<Value>(&data).ok())
            .filter_map(|v| v["choices"][0]["delta"]["content"].as_str().map(str::to_string))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn write(&self, event: Option<&str>, data: &str) -> bool {
        let mut frames = self.frames.lock().unwrap();
        frames.push((event.map(str::to_string), data.to_string()));
        if self.close_after.is_some_and(|n| frames.len() >= n) {
            self.close();
        }
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn drained(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// A sink that reports a full buffer for its first writes and only drains
/// once `release` is called.
pub struct GatedSink {
    frames: Mutex<Vec<Frame>>,
    reject: AtomicUsize,
    released: AtomicBool,
    closed: AtomicBool,
    notify: Notify,
}

impl GatedSink {
    pub fn new(reject_first: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            reject: AtomicUsize::new(reject_first),
            released: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Close without ever draining.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl EventSink for GatedSink {
    fn write(&self, event: Option<&str>, data: &str) -> bool {
        self.frames
            .lock()
            .unwrap()
            .push((event.map(str::to_string), data.to_string()));
        self.reject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn drained(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            loop {
                let notified = self.notify.notified();
                if self.released.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        })
    }
}

/// Counts a fixed number of tokens per message.
pub struct FixedTokenCounter(pub usize);

impl TokenCounter for FixedTokenCounter {
    fn count(&self, messages: &[Message], tools: Option<&[ToolDefinition]>) -> usize {
        (messages.len() + tools.map_or(0, <[_]>::len)) * self.0
    }
}

/// Engine config with a single priced model `test-model`.
pub fn test_config(protocol: ToolProtocolKind) -> EngineConfig {
    let mut model = ModelConfig::new("test-model").with_protocol(protocol);
    model.input_price = 1.0;
    model.output_price = 2.0;
    EngineConfig {
        models: vec![model],
        ..Default::default()
    }
}

/// Write `content` to a temporary config file.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}
