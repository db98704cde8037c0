//! Incremental event-stream decoding.
//!
//! Bytes arrive in whatever chunks the transport hands us; [`FrameParser`]
//! buffers partial lines and records across chunk boundaries and yields one
//! [`ParsedFrame`] per complete record. A `data:` line carrying the literal
//! sentinel ends the sequence for good.

use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};
use memchr::memchr2;
use tracing::{debug, warn};

pub const SENTINEL: &str = "[DONE]";
pub const DEFAULT_EVENT: &str = "message";
pub const FATAL_ERROR_EVENT: &str = "FatalError";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data: data.into(),
        }
    }

    pub fn is_fatal_error(&self) -> bool {
        self.event == FATAL_ERROR_EVENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFrame {
    Frame(Frame),
    Done,
}

#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
    skip_lf: bool,
    done: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sentinel has been seen. Input after that point is dropped.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<ParsedFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        loop {
            if self.skip_lf {
                if start >= self.buffer.len() {
                    break;
                }
                if self.buffer[start] == b'\n' {
                    start += 1;
                }
                self.skip_lf = false;
            }

            let Some(relative) = memchr2(b'\n', b'\r', &self.buffer[start..]) else {
                break;
            };
            let end = start + relative;
            if self.buffer[end] == b'\r' {
                self.skip_lf = true;
            }
            let line = decode_line(&self.buffer[start..end]);
            start = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
                if self.done {
                    break;
                }
            }
        }

        if self.done {
            self.buffer.clear();
        } else {
            self.buffer.drain(..start);
        }
        frames
    }

    /// Flushes whatever is left once the transport reports end of stream.
    /// A record that lacks its closing blank line is still delivered.
    pub fn finish(&mut self) -> Vec<ParsedFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        if !self.buffer.is_empty() {
            let line = decode_line(&self.buffer);
            self.buffer.clear();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        if !self.done {
            frames.extend(self.dispatch().map(ParsedFrame::Frame));
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<ParsedFrame> {
        if line.is_empty() {
            return self.dispatch().map(ParsedFrame::Frame);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(index) => {
                let value = &line[index + 1..];
                (&line[..index], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if value == SENTINEL {
                    self.done = true;
                    self.event = None;
                    self.data = None;
                    return Some(ParsedFrame::Done);
                }
                match self.data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => self.data = Some(value.to_string()),
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let Some(data) = self.data.take() else {
            if event.is_some() {
                debug!("dropping event-stream record without data field");
            }
            return None;
        };
        let event = event
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());
        Some(Frame { event, data })
    }
}

fn decode_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(err) => {
            warn!("Invalid UTF-8 in event stream: {err}");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

struct FrameStreamState<S> {
    inner: std::pin::Pin<Box<S>>,
    parser: FrameParser,
    ready: VecDeque<ParsedFrame>,
    exhausted: bool,
}

/// Decodes a byte stream lazily. Each call owns a fresh parser, so a
/// reconnect simply wraps the new body again.
pub fn frame_stream<S, B, E>(body: S) -> impl Stream<Item = Result<ParsedFrame, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = FrameStreamState {
        inner: Box::pin(body),
        parser: FrameParser::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.exhausted || state.parser.is_done() {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.parser.push(chunk.as_ref())),
                Some(Err(err)) => {
                    state.exhausted = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.exhausted = true;
                    state.ready.extend(state.parser.finish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        ": keep-alive\n\n",
        "event: update\r\n",
        "data: first\r\n",
        "data: second\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn parse_all(chunks: &[&[u8]]) -> Vec<ParsedFrame> {
        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(parser.push(chunk));
        }
        frames.extend(parser.finish());
        frames
    }

    #[test]
    fn decodes_records_comments_and_sentinel() {
        let frames = parse_all(&[SAMPLE.as_bytes()]);
        assert_eq!(
            frames,
            vec![
                ParsedFrame::Frame(Frame::message(
                    r#"{"choices":[{"delta":{"content":"Hi"}}]}"#
                )),
                ParsedFrame::Frame(Frame {
                    event: "update".to_string(),
                    data: "first\nsecond".to_string(),
                }),
                ParsedFrame::Frame(Frame::message(
                    r#"{"choices":[{"delta":{"content":" there"}}]}"#
                )),
                ParsedFrame::Done,
            ]
        );
    }

    #[test]
    fn any_split_point_yields_the_same_frames() {
        let bytes = SAMPLE.as_bytes();
        let whole = parse_all(&[bytes]);
        for offset in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(offset);
            assert_eq!(parse_all(&[head, tail]), whole, "split at byte {offset}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_input() {
        let bytes = SAMPLE.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(parse_all(&chunks), parse_all(&[bytes]));
    }

    #[test]
    fn sentinel_stops_parsing_stray_bytes() {
        let mut parser = FrameParser::new();
        let frames = parser.push(b"data: [DONE]\n\ndata: after\n\n");
        assert_eq!(frames, vec![ParsedFrame::Done]);
        assert!(parser.is_done());
        assert!(parser.push(b"data: more\n\n").is_empty());
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn sentinel_without_space_is_recognised() {
        assert_eq!(parse_all(&[b"data:[DONE]\n".as_slice()]), vec![ParsedFrame::Done]);
    }

    #[test]
    fn padded_sentinel_is_ordinary_data() {
        let frames = parse_all(&[b"data:  [DONE]  \n\ndata: [DONE]\n\n".as_slice()]);
        assert_eq!(
            frames,
            vec![
                ParsedFrame::Frame(Frame::message(" [DONE]  ")),
                ParsedFrame::Done
            ]
        );
    }

    #[test]
    fn records_without_data_are_ignored() {
        let frames = parse_all(&[b"event: ping\n\nid: 7\nretry: 10\n\ndata: kept\n\n".as_slice()]);
        assert_eq!(frames, vec![ParsedFrame::Frame(Frame::message("kept"))]);
    }

    #[test]
    fn fatal_error_event_is_exposed() {
        let frames = parse_all(&[b"event: FatalError\ndata: quota exceeded\n\n".as_slice()]);
        match frames.as_slice() {
            [ParsedFrame::Frame(frame)] => {
                assert!(frame.is_fatal_error());
                assert_eq!(frame.data, "quota exceeded");
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn finish_flushes_unterminated_record() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        assert_eq!(
            parser.finish(),
            vec![ParsedFrame::Frame(Frame::message("tail"))]
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let frames = parse_all(&[b"data: caf\xff\n\n".as_slice()]);
        assert_eq!(
            frames,
            vec![ParsedFrame::Frame(Frame::message("caf\u{fffd}"))]
        );
    }

    #[tokio::test]
    async fn frame_stream_stops_after_sentinel() {
        let chunks: Vec<Result<&[u8], std::io::Error>> = vec![
            Ok(b"data: one\n".as_slice()),
            Ok(b"\ndata: [DO".as_slice()),
            Ok(b"NE]\n\n".as_slice()),
            Ok(b"data: ignored\n\n".as_slice()),
        ];
        let frames: Vec<_> = frame_stream(stream::iter(chunks))
            .map(|item| item.expect("no transport errors"))
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![ParsedFrame::Frame(Frame::message("one")), ParsedFrame::Done]
        );
    }

    #[tokio::test]
    async fn frame_stream_surfaces_transport_errors() {
        let chunks: Vec<Result<&[u8], String>> =
            vec![Ok(b"data: one\n\n".as_slice()), Err("reset".to_string())];
        let items: Vec<_> = frame_stream(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(ParsedFrame::Frame(_))));
        assert_eq!(items[1], Err("reset".to_string()));
    }
}
