use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;

use skein_core::error::{Result, SkeinError};

/// Incremental parser for `text/event-stream` bodies.
/// Frames are separated by a blank line; `\r\n` line endings are accepted.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

/// One parsed server-sent frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text into the parser and extract complete frames.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        if chunk.contains('\r') {
            self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        } else {
            self.buffer.push_str(chunk);
        }

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        // Comment lines keep proxies from timing out the connection.
        if line.starts_with(':') {
            continue;
        }
        if let Some(val) = line.strip_prefix("event:") {
            event_type = Some(val.trim_start().to_string());
        } else if let Some(val) = line.strip_prefix("data:") {
            data_lines.push(val.strip_prefix(' ').unwrap_or(val));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event_type,
        data: data_lines.join("\n"),
    })
}

/// Adapts a response byte stream into parsed SSE frames.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: VecDeque<SseFrame>,
    /// Trailing bytes of a UTF-8 sequence split across chunks.
    partial: Vec<u8>,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            partial: Vec::new(),
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.partial.extend_from_slice(bytes);
        match std::str::from_utf8(&self.partial) {
            Ok(text) => {
                let text = text.to_string();
                self.partial.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.partial[..valid]).into_owned();
                self.partial.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                text
            }
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseFrame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let text = this.decode(&bytes);
                    this.pending.extend(this.parser.feed(&text));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(SkeinError::LlmStream(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_sse_parser_basic() {
        let mut parser = SseParser::new();
        let frames = parser.feed("data: {\"id\":\"1\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, None);
        assert_eq!(frames[0].data, "{\"id\":\"1\"}");
    }

    #[test]
    fn test_sse_parser_named_and_crlf() {
        let mut parser = SseParser::new();
        let frames = parser.feed("event: answer\r\ndata: {\"x\":1}\r\n\r\n: ping\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type.as_deref(), Some("answer"));
    }

    #[test]
    fn test_sse_parser_chunked() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"x\":").is_empty());
        let frames = parser.feed("1}\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"x\":1}");
        assert_eq!(frames[1].data, "[DONE]");
    }

    #[tokio::test]
    async fn test_stream_rejoins_split_utf8() {
        let text = "data: {\"c\":\"時\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let chunks: Vec<std::result::Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::copy_from_slice(&text[..split])),
            Ok(bytes::Bytes::copy_from_slice(&text[split..])),
        ];
        let frames: Vec<_> = SseStream::new(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().data, "{\"c\":\"時\"}");
    }

    #[tokio::test]
    async fn test_stream_surfaces_transport_error() {
        let chunks: Vec<std::result::Result<bytes::Bytes, String>> =
            vec![Err("connection reset".to_string())];
        let mut stream = SseStream::new(futures::stream::iter(chunks));
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(SkeinError::LlmStream(_))));
    }
}
