//! Line framing for event streams
//!
//! Upstream chunks do not respect line boundaries; lines (and multi-byte
//! characters) can be split across chunks.

use crate::services::gateway::GatewayError;
use axum::body::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Accumulates raw bytes and hands out complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every completed line, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Trailing bytes not terminated by a newline
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

pin_project! {
    /// Stream adapter turning a byte stream into its lines, in order
    ///
    /// A transport error is yielded once and ends the stream.
    pub struct EventLines<S> {
        #[pin]
        inner: S,
        buffer: LineBuffer,
        ready: VecDeque<String>,
        done: bool,
    }
}

impl<S> EventLines<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: LineBuffer::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for EventLines<S>
where
    S: Stream<Item = Result<Bytes, GatewayError>>,
{
    type Item = Result<String, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match futures::ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.ready.extend(this.buffer.push(&chunk)),
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    *this.done = true;
                    if let Some(rest) = this.buffer.finish() {
                        this.ready.push_back(rest);
                    }
                }
            }
        }
    }
}
