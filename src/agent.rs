//! The retrieval-augmented chat agent.
//!
//! One turn runs strictly in sequence:
//!
//! ```text
//! newest user text ──▶ embed ──▶ vector query (top K) ──▶ join metadata text
//!                                                              │
//!            stream ◀── chat model ◀── [system prompt, ...history]
//! ```
//!
//! Retrieval failures are absorbed: the context becomes
//! [`CONTEXT_ERROR_PLACEHOLDER`] and generation still runs. Generation
//! failures are returned to the caller.
//!
//! The agent does not own conversation history. It is handed the full
//! history for the turn and never stores it.

use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::embedding::{embed_query, Embedder};
use crate::error::{ChatError, RetrievalError};
use crate::llm::{ChatModel, ChatStream};
use crate::models::{ChatMessage, QueryMatch, Role};
use crate::vector_store::VectorStore;

/// Context text used when embedding or querying fails.
pub const CONTEXT_ERROR_PLACEHOLDER: &str = "Error: Could not retrieve context.";

/// Input for one chat turn.
///
/// Tool and function calling are not supported; there is deliberately no
/// field for tool definitions.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Full conversation history, oldest first, including the new message.
    pub messages: Vec<ChatMessage>,
    /// Abandons generation when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

pub struct ChatAgent {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
}

impl ChatAgent {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            chat,
            top_k,
        }
    }

    /// Handle one turn, returning the model's streamed reply.
    pub async fn handle_message(&self, request: ChatRequest) -> Result<ChatStream, ChatError> {
        let cancel = request.cancel.unwrap_or_default();

        let context = self.retrieve_context(&request.messages).await;
        let messages = build_messages(&context, &request.messages);

        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        tracing::debug!(
            model = self.chat.model_name(),
            messages = messages.len(),
            context_len = context.len(),
            "starting generation"
        );

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            res = self.chat.stream_chat(&messages) => res?,
        };

        Ok(Box::pin(stream.take_until(cancel.cancelled_owned())))
    }

    /// Build the context block for the newest message.
    ///
    /// Only a trailing `user` message triggers retrieval. Its text is used
    /// as-is, even when empty.
    pub async fn retrieve_context(&self, messages: &[ChatMessage]) -> String {
        let query = match messages.last() {
            Some(last) if last.role == Role::User => last.content.as_str(),
            _ => return String::new(),
        };

        match self.try_retrieve(query).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "context retrieval failed");
                CONTEXT_ERROR_PLACEHOLDER.to_string()
            }
        }
    }

    async fn try_retrieve(&self, query: &str) -> Result<String, RetrievalError> {
        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(RetrievalError::Embedding)?;
        let matches = self
            .store
            .query(&vector, self.top_k, true)
            .await
            .map_err(RetrievalError::Query)?;

        tracing::debug!(matches = matches.len(), "vector query returned");
        Ok(assemble_context(&matches, self.top_k))
    }
}

/// Join the text of up to `top_k` matches with blank lines, in store order.
/// Matches without text are skipped.
pub fn assemble_context(matches: &[QueryMatch], top_k: usize) -> String {
    matches
        .iter()
        .take(top_k)
        .filter_map(QueryMatch::text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The system message that frames every turn.
pub fn system_prompt(context: &str) -> ChatMessage {
    ChatMessage::system(format!(
        "You are a helpful assistant. Answer the user's question using the chat history and the following context.\nCONTEXT: {}\n---",
        context
    ))
}

/// `[system prompt, ...history]`, with any earlier system messages dropped.
pub fn build_messages(context: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(system_prompt(context));
    messages.extend(history.iter().filter(|m| m.role != Role::System).cloned());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StreamEvent;
    use crate::models::{VectorMetadata, VectorRecord};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::Value;
    use std::sync::Mutex;

    // ─── Mocks ──────────────────────────────────────────────────────

    struct MockEmbedder {
        fail: bool,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl MockEmbedder {
        fn ok() -> Self {
            Self {
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }
        fn failing() -> Self {
            Self {
                fail: true,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        fn model_name(&self) -> &str {
            "mock-embed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().push(texts.to_vec());
            if self.fail {
                bail!("embedding service unavailable");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct MockStore {
        matches: Vec<QueryMatch>,
        fail: bool,
        queries: Mutex<Vec<(Vec<f32>, usize, bool)>>,
    }

    impl MockStore {
        fn with_matches(matches: Vec<QueryMatch>) -> Self {
            Self {
                matches,
                fail: false,
                queries: Mutex::new(Vec::new()),
            }
        }
        fn failing() -> Self {
            Self {
                matches: Vec::new(),
                fail: true,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorStore for MockStore {
        async fn insert(&self, _records: &[VectorRecord]) -> Result<()> {
            Ok(())
        }
        async fn query(
            &self,
            vector: &[f32],
            top_k: usize,
            include_metadata: bool,
        ) -> Result<Vec<QueryMatch>> {
            self.queries
                .lock()
                .unwrap()
                .push((vector.to_vec(), top_k, include_metadata));
            if self.fail {
                bail!("index offline");
            }
            Ok(self.matches.clone())
        }
    }

    struct MockChat {
        reply: Vec<&'static str>,
        fail: bool,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl MockChat {
        fn replying(reply: Vec<&'static str>) -> Self {
            Self {
                reply,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }
        fn failing() -> Self {
            Self {
                reply: Vec::new(),
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }
        fn last_call(&self) -> Vec<ChatMessage> {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for MockChat {
        fn model_name(&self) -> &str {
            "mock-chat"
        }
        async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChatStream, ChatError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            if self.fail {
                return Err(ChatError::Generation(anyhow::anyhow!("model overloaded")));
            }
            let mut items: Vec<Result<StreamEvent, ChatError>> = self
                .reply
                .iter()
                .map(|t| Ok(StreamEvent::Delta(t.to_string())))
                .collect();
            items.push(Ok(StreamEvent::Done));
            Ok(Box::pin(stream::iter(items)))
        }
        async fn prompt(&self, _prompt: &str) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn text_match(id: &str, text: &str) -> QueryMatch {
        QueryMatch {
            id: id.to_string(),
            score: 0.9,
            metadata: Some(VectorMetadata {
                text: Some(text.to_string()),
            }),
        }
    }

    fn agent(
        embedder: Arc<MockEmbedder>,
        store: Arc<MockStore>,
        chat: Arc<MockChat>,
    ) -> ChatAgent {
        ChatAgent::new(embedder, store, chat, 3)
    }

    async fn drain(stream: ChatStream) -> Vec<StreamEvent> {
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|i| i.unwrap())
            .collect()
    }

    // ─── Tests ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_context_from_match_reaches_system_prompt() {
        let embedder = Arc::new(MockEmbedder::ok());
        let store = Arc::new(MockStore::with_matches(vec![text_match(
            "p3",
            "The main LLM is Llama 3.3...",
        )]));
        let chat = Arc::new(MockChat::replying(vec!["Llama ", "3.3"]));
        let agent = agent(embedder.clone(), store.clone(), chat.clone());

        let history = vec![ChatMessage::user("What LLM does this use?")];
        let stream = agent
            .handle_message(ChatRequest::new(history.clone()))
            .await
            .unwrap();
        let events = drain(stream).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Llama ".into()),
                StreamEvent::Delta("3.3".into()),
                StreamEvent::Done
            ]
        );

        assert_eq!(
            embedder.seen.lock().unwrap().as_slice(),
            &[vec!["What LLM does this use?".to_string()]]
        );
        let queries = store.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0], (vec![1.0, 0.0], 3, true));

        let sent = chat.last_call();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0]
            .content
            .contains("CONTEXT: The main LLM is Llama 3.3..."));
        assert_eq!(sent[1], history[0]);
    }

    #[tokio::test]
    async fn test_zero_matches_gives_empty_context() {
        let chat = Arc::new(MockChat::replying(vec!["ok"]));
        let agent = agent(
            Arc::new(MockEmbedder::ok()),
            Arc::new(MockStore::with_matches(vec![])),
            chat.clone(),
        );

        let stream = agent
            .handle_message(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        drain(stream).await;

        assert_eq!(chat.last_call()[0], system_prompt(""));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_placeholder() {
        let store = Arc::new(MockStore::with_matches(vec![text_match("p1", "x")]));
        let chat = Arc::new(MockChat::replying(vec!["sorry"]));
        let agent = agent(Arc::new(MockEmbedder::failing()), store.clone(), chat.clone());

        let stream = agent
            .handle_message(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(drain(stream).await.last(), Some(&StreamEvent::Done));

        assert!(store.queries.lock().unwrap().is_empty());
        assert!(chat.last_call()[0]
            .content
            .contains("CONTEXT: Error: Could not retrieve context."));
    }

    #[tokio::test]
    async fn test_query_failure_degrades_to_placeholder() {
        let chat = Arc::new(MockChat::replying(vec![]));
        let agent = agent(
            Arc::new(MockEmbedder::ok()),
            Arc::new(MockStore::failing()),
            chat.clone(),
        );

        let stream = agent
            .handle_message(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        drain(stream).await;
        assert_eq!(chat.last_call()[0], system_prompt(CONTEXT_ERROR_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_generation_failure_is_fatal() {
        let agent = agent(
            Arc::new(MockEmbedder::ok()),
            Arc::new(MockStore::with_matches(vec![])),
            Arc::new(MockChat::failing()),
        );
        let res = agent
            .handle_message(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(matches!(res, Err(ChatError::Generation(_))));
    }

    #[tokio::test]
    async fn test_empty_user_text_still_queries() {
        let embedder = Arc::new(MockEmbedder::ok());
        let store = Arc::new(MockStore::with_matches(vec![]));
        let agent = agent(
            embedder.clone(),
            store.clone(),
            Arc::new(MockChat::replying(vec![])),
        );

        let context = agent.retrieve_context(&[ChatMessage::user("")]).await;
        assert_eq!(context, "");
        assert_eq!(embedder.seen.lock().unwrap()[0], vec![String::new()]);
        assert_eq!(store.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_retrieval_when_last_message_not_user() {
        let embedder = Arc::new(MockEmbedder::ok());
        let agent = agent(
            embedder.clone(),
            Arc::new(MockStore::with_matches(vec![text_match("p1", "x")])),
            Arc::new(MockChat::replying(vec![])),
        );

        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        assert_eq!(agent.retrieve_context(&history).await, "");
        assert_eq!(agent.retrieve_context(&[]).await, "");
        assert!(embedder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_generation() {
        let chat = Arc::new(MockChat::replying(vec!["never"]));
        let agent = agent(
            Arc::new(MockEmbedder::ok()),
            Arc::new(MockStore::with_matches(vec![])),
            chat.clone(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = agent
            .handle_message(
                ChatRequest::new(vec![ChatMessage::user("hi")]).with_cancel(cancel),
            )
            .await;
        assert!(matches!(res, Err(ChatError::Cancelled)));
        assert!(chat.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_stream_stops_output() {
        let agent = agent(
            Arc::new(MockEmbedder::ok()),
            Arc::new(MockStore::with_matches(vec![])),
            Arc::new(MockChat::replying(vec!["a", "b", "c"])),
        );
        let cancel = CancellationToken::new();
        let mut stream = agent
            .handle_message(
                ChatRequest::new(vec![ChatMessage::user("hi")]).with_cancel(cancel.clone()),
            )
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, StreamEvent::Delta("a".into()));
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_assemble_context_order_skip_and_limit() {
        let matches = vec![
            text_match("a", "first"),
            QueryMatch {
                id: "b".into(),
                score: 0.8,
                metadata: None,
            },
            text_match("c", ""),
            text_match("d", "second"),
            text_match("e", "beyond top k"),
        ];
        assert_eq!(assemble_context(&matches, 4), "first\n\nsecond");
        assert_eq!(assemble_context(&matches, 1), "first");
        assert_eq!(assemble_context(&[], 3), "");
    }

    #[test]
    fn test_system_prompt_template() {
        let msg = system_prompt("ctx");
        assert_eq!(msg.role, Role::System);
        assert_eq!(
            msg.content,
            "You are a helpful assistant. Answer the user's question using the chat history and the following context.\nCONTEXT: ctx\n---"
        );
    }

    #[test]
    fn test_build_messages_replaces_prior_system() {
        let history = vec![
            ChatMessage::system("stale"),
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ];
        let msgs = build_messages("fresh", &history);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], system_prompt("fresh"));
        assert_eq!(&msgs[1..], &history[1..]);
    }
}
