use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::trace;

use skein_core::event::{SseEvent, SseEventKind};
use skein_core::traits::EventSink;

/// How often a writer blocked on a full sink checks whether it closed.
const CLOSE_POLL: Duration = Duration::from_millis(50);

struct WriterInner {
    sink: Arc<dyn EventSink>,
    /// Held for the whole of a write, drain wait included, so frames from
    /// concurrent producers never interleave or overtake a blocked one.
    gate: Mutex<()>,
    detail: bool,
}

/// Ordered, back-pressure aware writer of run events.
#[derive(Clone)]
pub struct StreamWriter {
    inner: Arc<WriterInner>,
}

impl StreamWriter {
    pub fn new(sink: Arc<dyn EventSink>, detail: bool) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                sink,
                gate: Mutex::new(()),
                detail,
            }),
        }
    }

    pub fn detail(&self) -> bool {
        self.inner.detail
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sink.is_closed()
    }

    /// Write one event. Returns once the sink can take the next frame.
    pub async fn send(&self, event: SseEvent) {
        if !self.inner.detail && event.kind.is_detail_only() {
            return;
        }
        let name = match event.kind {
            SseEventKind::Answer if !self.inner.detail => None,
            kind => Some(kind.as_str()),
        };
        let data = event.data.to_string();

        let _gate = self.inner.gate.lock().await;
        if self.inner.sink.is_closed() {
            trace!(event = ?name, "Sink closed, dropping frame");
            return;
        }
        if !self.inner.sink.write(name, &data) {
            trace!(event = ?name, "Sink full, waiting for drain");
            let sink = self.inner.sink.as_ref();
            tokio::select! {
                _ = sink.drained() => {}
                _ = wait_closed(sink) => trace!(event = ?name, "Sink closed while full"),
            }
        }
    }
}

async fn wait_closed(sink: &dyn EventSink) {
    while !sink.is_closed() {
        tokio::time::sleep(CLOSE_POLL).await;
    }
}

/// Render one frame in `text/event-stream` form.
pub fn format_frame(event: Option<&str>, data: &str) -> String {
    match event {
        Some(name) => format!("event: {name}\ndata: {data}\n\n"),
        None => format!("data: {data}\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_test_utils::{GatedSink, RecordingSink};

    #[test]
    fn frames_with_and_without_event_name() {
        assert_eq!(format_frame(Some("answer"), "{}"), "event: answer\ndata: {}\n\n");
        assert_eq!(format_frame(None, "{}"), "data: {}\n\n");
    }

    #[tokio::test]
    async fn detail_off_hides_tool_frames_and_answer_names() {
        let sink = Arc::new(RecordingSink::new());
        let writer = StreamWriter::new(sink.clone(), false);
        writer.send(SseEvent::tool_call("c1", "getTime", "getTime")).await;
        writer.send(SseEvent::answer("Hi")).await;
        writer.send(SseEvent::error("boom")).await;

        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, None);
        assert_eq!(frames[1].0.as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn detail_on_names_every_frame() {
        let sink = Arc::new(RecordingSink::new());
        let writer = StreamWriter::new(sink.clone(), true);
        writer.send(SseEvent::node_status("Agent")).await;
        writer.send(SseEvent::answer("Hi")).await;
        let names: Vec<_> = sink.frames().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![Some("flowNodeStatus".into()), Some("answer".into())]);
    }

    #[tokio::test]
    async fn closed_sink_drops_frames() {
        let sink = Arc::new(RecordingSink::new());
        sink.close();
        let writer = StreamWriter::new(sink.clone(), true);
        writer.send(SseEvent::answer("lost")).await;
        assert!(writer.is_closed());
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn send_waits_for_drain() {
        let sink = Arc::new(GatedSink::new(1));
        let writer = StreamWriter::new(sink.clone(), true);

        let pending = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.send(SseEvent::answer("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        sink.release();
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.frames().len(), 1);
    }

    #[tokio::test]
    async fn full_sink_that_closes_releases_writer() {
        let sink = Arc::new(GatedSink::new(1));
        let writer = StreamWriter::new(sink.clone(), true);

        let pending = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.send(SseEvent::answer("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        sink.close();
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(writer.is_closed());
    }
}
