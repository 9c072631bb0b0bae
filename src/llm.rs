//! Chat-completion model abstraction and streamed output.
//!
//! A completion is a lazy, finite, non-restartable [`ChatStream`]:
//!
//! * `Ok(StreamEvent::Delta(text))` for every chunk of generated text
//! * `Ok(StreamEvent::Done)` exactly once, as the final item
//! * `Err(ChatError::Stream(..))` if the stream breaks after it started
//!
//! A failure before any output (bad status, unreachable model) is returned
//! from [`ChatModel::stream_chat`] itself, so no stream is ever produced.
//!
//! Workers AI streams as server-sent events:
//!
//! ```text
//! data: {"response":"Hel"}
//!
//! data: {"response":"lo"}
//!
//! data: [DONE]
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;

use crate::cloudflare::CloudflareClient;
use crate::error::ChatError;
use crate::models::ChatMessage;

/// One item of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ChatError>> + Send>>;

/// Trait for chat-completion backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start a streamed completion over `messages`.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChatStream, ChatError>;

    /// Run a bare, non-streamed prompt and return the raw model result.
    async fn prompt(&self, prompt: &str) -> Result<Value>;
}

/// Chat model served by Workers AI.
pub struct WorkersAiChat {
    client: CloudflareClient,
    model: String,
}

impl WorkersAiChat {
    pub fn new(client: CloudflareClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for WorkersAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChatStream, ChatError> {
        let body = json!({ "messages": messages, "stream": true });
        let resp = self
            .client
            .run_model_stream(&self.model, &body)
            .await
            .map_err(ChatError::Generation)?;
        Ok(decode_sse_stream(resp.bytes_stream()))
    }

    async fn prompt(&self, prompt: &str) -> Result<Value> {
        self.client
            .run_model(&self.model, &json!({ "prompt": prompt }))
            .await
    }
}

/// Incremental server-sent-events parser.
///
/// Bytes may be split anywhere, including inside a line; only complete
/// events are returned. Only `data:` fields are kept; `event:`, `id:`,
/// `retry:` and comment lines are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the data payload of each completed event.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(data) = self.data.take() {
                    events.push(data);
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                match &mut self.data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => self.data = Some(value.to_string()),
                }
            }
        }

        events
    }

    /// Flush an event left unterminated when the body ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buf.is_empty() {
            let mut events = self.push(b"\n");
            if let Some(data) = self.data.take() {
                events.push(data);
            }
            return events.pop();
        }
        self.data.take()
    }
}

/// Interpret one SSE data payload from Workers AI.
///
/// Returns `Ok(None)` for payloads that carry no text.
pub fn parse_event(data: &str) -> Result<Option<StreamEvent>, ChatError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(StreamEvent::Done));
    }
    let json: Value = serde_json::from_str(data)
        .map_err(|e| ChatError::Stream(format!("invalid stream payload: {}", e)))?;
    match json.get("response").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(Some(StreamEvent::Delta(text.to_string()))),
        _ => Ok(None),
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, ChatError>>,
    upstream_ended: bool,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn accept(&mut self, data: &str) {
        match parse_event(data) {
            Ok(Some(event)) => self.pending.push_back(Ok(event)),
            Ok(None) => {}
            Err(e) => self.pending.push_back(Err(e)),
        }
    }
}

/// Turn a raw SSE byte stream into a [`ChatStream`].
///
/// The output ends after the first `Done` or error. A body that closes
/// without `[DONE]` yields a trailing [`ChatError::Stream`].
pub fn decode_sse_stream<S, B, E>(body: S) -> ChatStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        upstream_ended: false,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            if let Some(item) = st.pending.pop_front() {
                if matches!(item, Ok(StreamEvent::Done) | Err(_)) {
                    st.finished = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.upstream_ended {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for data in st.decoder.push(bytes.as_ref()) {
                        st.accept(&data);
                    }
                }
                Some(Err(e)) => {
                    st.pending
                        .push_back(Err(ChatError::Stream(format!("upstream read failed: {}", e))));
                }
                None => {
                    st.upstream_ended = true;
                    if let Some(data) = st.decoder.finish() {
                        st.accept(&data);
                    }
                    if !st
                        .pending
                        .iter()
                        .any(|i| matches!(i, Ok(StreamEvent::Done) | Err(_)))
                    {
                        st.pending.push_back(Err(ChatError::Stream(
                            "upstream closed before end of stream".to_string(),
                        )));
                    }
                }
            }
        }
    }))
}
