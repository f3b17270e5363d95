//! Stream sources shared by the coordinator tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use futures::StreamExt;
use serde_json::json;
use speciesproxy::models::gemini::GeminiRequest;
use speciesproxy::services::gateway::{GatewayError, LlmStream, RetryDiagnostics, StreamHandle};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type Chunk = Result<Bytes, GatewayError>;

/// Event line carrying one text fragment
pub fn event(text: &str) -> String {
    let envelope = json!({
        "candidates": [{"content": {"parts": [{"text": text}]}}]
    });
    format!("data: {}\n\n", envelope)
}

/// Reply played back by [`ScriptedStream`]
pub enum Reply {
    /// 2xx stream of the given chunks
    Chunks(Vec<Chunk>),
    /// Non-2xx stream with a body
    Status(u16, String),
    /// The stream could not be opened
    Fail(GatewayError),
}

impl Reply {
    /// 2xx stream sending each fragment as its own event, then the sentinel
    pub fn text(fragments: &[&str]) -> Self {
        let mut chunks: Vec<Chunk> = fragments.iter().map(|f| Ok(Bytes::from(event(f)))).collect();
        chunks.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));
        Reply::Chunks(chunks)
    }
}

/// Plays back one scripted reply per opened stream and records every request
#[derive(Default)]
pub struct ScriptedStream {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GeminiRequest>>,
}

impl ScriptedStream {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GeminiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn handle(status: u16, chunks: Vec<Chunk>) -> StreamHandle {
    StreamHandle {
        status,
        content_type: Some("text/event-stream".to_string()),
        diagnostics: RetryDiagnostics::default(),
        body: futures::stream::iter(chunks).boxed(),
    }
}

#[async_trait]
impl LlmStream for ScriptedStream {
    async fn open_stream(&self, request: &GeminiRequest) -> Result<StreamHandle, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text(&[]));

        match reply {
            Reply::Chunks(chunks) => Ok(handle(200, chunks)),
            Reply::Status(status, body) => Ok(handle(status, vec![Ok(Bytes::from(body))])),
            Reply::Fail(error) => Err(error),
        }
    }
}

/// Stream whose chunks are pushed by the test through a channel
pub struct ChannelStream {
    receiver: Mutex<Option<mpsc::Receiver<Chunk>>>,
}

impl ChannelStream {
    pub fn new() -> (Self, mpsc::Sender<Chunk>) {
        let (sender, receiver) = mpsc::channel(16);
        (
            Self {
                receiver: Mutex::new(Some(receiver)),
            },
            sender,
        )
    }
}

#[async_trait]
impl LlmStream for ChannelStream {
    async fn open_stream(&self, _request: &GeminiRequest) -> Result<StreamHandle, GatewayError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| GatewayError::Stream("channel already consumed".to_string()))?;

        Ok(StreamHandle {
            status: 200,
            content_type: Some("text/event-stream".to_string()),
            diagnostics: RetryDiagnostics::default(),
            body: ReceiverStream::new(receiver).boxed(),
        })
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
