//! Incremental decoding of a streamed completion.
//!
//! The agent answers a `stream: true` request with newline-delimited
//! server-sent events. [`LineBuffer`] reassembles lines across network
//! chunks, [`decode_line`] turns one line into a [`StreamEvent`], and
//! [`CompletionStream`] ties both to the response body.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::error::AgentError;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// One significant item of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text taken from `choices[0].delta.content`.
    Delta(String),
    /// A `data:` payload that is not a completion chunk, passed on untouched.
    Raw(String),
    /// The `[DONE]` end marker.
    Done,
}

impl StreamEvent {
    /// Text carried by the event, `None` for the end marker.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::Delta(t) | StreamEvent::Raw(t) => Some(t),
            StreamEvent::Done => None,
        }
    }
}

// ── Chunk shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<ChunkChoice>,
}

/// A choice without a `delta` object is not a streaming chunk and falls back
/// to [`Payload::Raw`].
#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Outcome of decoding one `data:` payload.
#[derive(Debug, PartialEq, Eq)]
enum Payload<'a> {
    Done,
    /// A well-formed completion chunk and the text of its first choice, if any.
    Chunk(Option<String>),
    /// Anything that is not a completion chunk.
    Raw(&'a str),
}

fn classify(payload: &str) -> Payload<'_> {
    if payload.trim() == DONE_MARKER {
        return Payload::Done;
    }
    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => Payload::Chunk(
            chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|t| !t.is_empty()),
        ),
        Err(e) => {
            debug!(error = %e, payload_len = payload.len(), "malformed upstream chunk; forwarding raw");
            Payload::Raw(payload)
        }
    }
}

/// Decode one line of the upstream body.
///
/// Blank lines, lines without a `data:` prefix and completion chunks without
/// text yield `None`. Only the single space after `data:` is stripped, so a
/// raw payload is forwarded byte for byte.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() {
        return None;
    }
    match classify(payload) {
        Payload::Done => Some(StreamEvent::Done),
        Payload::Chunk(text) => text.map(StreamEvent::Delta),
        Payload::Raw(raw) => Some(StreamEvent::Raw(raw.to_owned())),
    }
}

// ── Line reassembly ──────────────────────────────────────────────────────────

/// Splits a byte stream into lines.
///
/// Bytes are kept until a `\n` arrives so that multi-byte UTF-8 sequences
/// split across network chunks decode intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(to_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Flush the unterminated remainder at end of body.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(to_line(&rest))
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ── Stream ───────────────────────────────────────────────────────────────────

/// Lazy, finite sequence of [`StreamEvent`]s read from an upstream body.
///
/// Ends after yielding [`StreamEvent::Done`], after the body closes, or after
/// yielding the first transport error. Dropping it drops the body and with it
/// the upstream connection.
pub struct CompletionStream {
    inner: BoxStream<'static, Result<StreamEvent, AgentError>>,
}

struct DecodeState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: LineBuffer,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

impl DecodeState {
    fn queue(&mut self, line: &str) {
        if let Some(ev) = decode_line(line) {
            self.ready.push_back(ev);
        }
    }
}

impl CompletionStream {
    /// Wrap a raw response body.
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        let state = DecodeState {
            body: body.boxed(),
            lines: LineBuffer::new(),
            ready: VecDeque::new(),
            finished: false,
        };

        let inner = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(ev) = st.ready.pop_front() {
                    if ev == StreamEvent::Done {
                        st.finished = true;
                        st.ready.clear();
                    }
                    return Some((Ok(ev), st));
                }
                if st.finished {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(bytes)) => {
                        for line in st.lines.push(&bytes) {
                            st.queue(&line);
                        }
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((Err(AgentError::Unavailable(e)), st));
                    }
                    None => {
                        st.finished = true;
                        if let Some(line) = st.lines.finish() {
                            st.queue(&line);
                        }
                    }
                }
            }
        })
        .boxed();

        Self { inner }
    }
}

impl Stream for CompletionStream {
    type Item = Result<StreamEvent, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompletionStream")
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
