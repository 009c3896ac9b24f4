//! Server-sent-events framing for the plan stream.
//!
//! Each SSE frame carries one JSON event in its `data:` lines. Frames with no
//! data, and the `[DONE]` sentinel, carry nothing and are skipped.

use std::collections::VecDeque;
use std::fmt;

use futures::StreamExt as _;
use futures::stream;

use crate::aggregator::EventStream;
use crate::error::{StreamError, TransportError};
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder; chunk boundaries may fall anywhere.
#[derive(Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing frame the server closed without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Decodes the event carried by one frame, if any.
pub fn frame_to_event(frame: &SseFrame) -> Option<Result<Event, StreamError>> {
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(Event::decode(data).map_err(StreamError::from))
}

/// Turns a raw SSE byte stream into an [`EventStream`].
///
/// A read error yields one `TransportError::Body` item and ends the stream.
pub fn decode_event_stream<S, B, E>(bytes_stream: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes_stream: S,
        decoder: SseDecoder,
        pending: VecDeque<Result<Event, StreamError>>,
        done: bool,
    }

    let initial = State {
        bytes_stream,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(initial, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.bytes_stream.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push_chunk(chunk.as_ref()) {
                        state.pending.extend(frame_to_event(&frame));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    state
                        .pending
                        .push_back(Err(TransportError::Body(e.to_string()).into()));
                }
                None => {
                    state.done = true;
                    if let Some(frame) = state.decoder.finish() {
                        state.pending.extend(frame_to_event(&frame));
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalformedEventError;
    use futures::StreamExt as _;

    fn chunks(parts: &[&'static str]) -> Vec<Result<&'static [u8], String>> {
        parts.iter().copied().map(|p| Ok(p.as_bytes())).collect()
    }

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let frames1 = decoder.push_chunk(b"event: message\ndata: {\"event_type\":\"content\",\"con");
        assert!(frames1.is_empty());
        let frames2 = decoder.push_chunk(b"tent\":\"hi\"}\n\n");
        assert_eq!(frames2.len(), 1);
        assert_eq!(frames2[0].event.as_deref(), Some("message"));
        assert_eq!(frames2[0].data, r#"{"event_type":"content","content":"hi"}"#);
    }

    #[test]
    fn sse_decoder_accepts_crlf_and_skips_comments() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push_chunk(b": keepalive\r\n\r\ndata: {\"a\":1}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"a":1}"#);
    }

    #[test]
    fn done_sentinel_and_empty_frames_are_skipped() {
        let done = SseFrame {
            event: None,
            data: "[DONE]".into(),
        };
        let empty = SseFrame {
            event: Some("ping".into()),
            data: String::new(),
        };
        assert!(frame_to_event(&done).is_none());
        assert!(frame_to_event(&empty).is_none());
    }

    #[tokio::test]
    async fn decodes_events_across_chunks() {
        let stream = decode_event_stream(stream::iter(chunks(&[
            "data: {\"event_type\":\"status\",\"message\":\"Starting...\"}\n\ndata: {\"event_",
            "type\":\"content\",\"content\":\"A\"}\n\n",
            "data: [DONE]\n\n",
        ])));
        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                Ok(Event::Status {
                    message: "Starting...".into()
                }),
                Ok(Event::Content {
                    content: "A".into()
                }),
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_trailing_frame_is_flushed() {
        let stream = decode_event_stream(stream::iter(chunks(&[
            "data: {\"event_type\":\"error\",\"error\":\"boom\"}",
        ])));
        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            events,
            vec![Ok(Event::Error {
                error: "boom".into()
            })]
        );
    }

    #[tokio::test]
    async fn malformed_frame_and_read_error_become_items() {
        let items: Vec<Result<&'static [u8], String>> = vec![
            Ok(b"data: {\"event_type\":\"bogus\"}\n\n".as_slice()),
            Err("connection reset".to_string()),
            Ok(b"data: {\"event_type\":\"content\",\"content\":\"x\"}\n\n".as_slice()),
        ];
        let events: Vec<_> = decode_event_stream(stream::iter(items)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            Err(StreamError::Malformed(MalformedEventError { .. }))
        ));
        assert_eq!(
            events[1],
            Err(StreamError::Transport(TransportError::Body(
                "connection reset".into()
            )))
        );
    }
}
