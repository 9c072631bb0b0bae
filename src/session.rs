//! Conversation sessions.
//!
//! A session is an ordered message log addressed by a [`SessionKey`]. The
//! [`SessionHost`] plays the role of a stateful actor around the
//! [`ChatAgent`]:
//!
//! 1. waits for any in-flight turn on the same session to finish
//! 2. appends the incoming user message
//! 3. hands the full history to the agent
//! 4. appends the assistant reply once its stream reaches `Done`
//!
//! The turn lock is held by the returned stream, so a second message for
//! the same session waits until the first reply has finished (or its stream
//! was dropped). Different sessions never wait on each other.
//!
//! Storage is behind [`ConversationStore`]; [`InMemoryConversations`] keeps
//! everything in process memory.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::agent::{ChatAgent, ChatRequest};
use crate::error::ChatError;
use crate::llm::{ChatStream, StreamEvent};
use crate::models::ChatMessage;

/// Validated session name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap an already-validated name. See [`crate::router::resolve`].
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent per-session message log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Full history, oldest first. Unknown sessions have an empty history.
    async fn history(&self, key: &SessionKey) -> Result<Vec<ChatMessage>>;
    async fn append(&self, key: &SessionKey, message: ChatMessage) -> Result<()>;
    async fn clear(&self, key: &SessionKey) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryConversations {
    sessions: RwLock<HashMap<SessionKey, Vec<ChatMessage>>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    async fn history(&self, key: &SessionKey) -> Result<Vec<ChatMessage>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow::anyhow!("session map lock poisoned"))?;
        Ok(sessions.get(key).cloned().unwrap_or_default())
    }

    async fn append(&self, key: &SessionKey, message: ChatMessage) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("session map lock poisoned"))?;
        sessions.entry(key.clone()).or_default().push(message);
        Ok(())
    }

    async fn clear(&self, key: &SessionKey) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("session map lock poisoned"))?;
        sessions.remove(key);
        Ok(())
    }
}

type TurnLocks = Arc<Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>>;

pub struct SessionHost {
    store: Arc<dyn ConversationStore>,
    agent: Arc<ChatAgent>,
    turns: TurnLocks,
}

impl SessionHost {
    pub fn new(store: Arc<dyn ConversationStore>, agent: Arc<ChatAgent>) -> Self {
        Self {
            store,
            agent,
            turns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for the session's turn lock. The map entry lives only while
    /// some caller holds or waits for it.
    async fn acquire_turn(&self, key: &SessionKey) -> TurnGuard {
        let lock = {
            let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
            turns.entry(key.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        TurnGuard {
            guard: Some(guard),
            lock,
            key: key.clone(),
            turns: self.turns.clone(),
        }
    }

    /// Run one turn: record `message`, then stream the agent's reply.
    pub async fn send(
        &self,
        key: &SessionKey,
        message: ChatMessage,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ChatError> {
        let guard = self.acquire_turn(key).await;

        self.store
            .append(key, message)
            .await
            .map_err(ChatError::History)?;
        let history = self.store.history(key).await.map_err(ChatError::History)?;

        tracing::info!(session = %key, messages = history.len(), "chat turn");

        let reply = self
            .agent
            .handle_message(ChatRequest::new(history).with_cancel(cancel))
            .await?;

        Ok(record_reply(reply, self.store.clone(), key.clone(), guard))
    }

    pub async fn history(&self, key: &SessionKey) -> Result<Vec<ChatMessage>> {
        self.store.history(key).await
    }

    /// Drop a session's history. Waits for any in-flight turn first.
    pub async fn clear(&self, key: &SessionKey) -> Result<()> {
        let _guard = self.acquire_turn(key).await;
        self.store.clear(key).await
    }

    #[cfg(test)]
    fn active_turns(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }
}

/// Holds a session's turn lock. On drop the lock is released, and the map
/// entry is removed when nobody else holds or waits for it.
struct TurnGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    key: SessionKey,
    turns: TurnLocks,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2
            && turns
                .get(&self.key)
                .is_some_and(|l| Arc::ptr_eq(l, &self.lock))
        {
            turns.remove(&self.key);
        }
    }
}

struct ReplyState {
    inner: ChatStream,
    text: String,
    store: Arc<dyn ConversationStore>,
    key: SessionKey,
    guard: Option<TurnGuard>,
}

/// Pass `reply` through unchanged, saving the assistant message on `Done`
/// and releasing the turn lock when the stream ends.
fn record_reply(
    reply: ChatStream,
    store: Arc<dyn ConversationStore>,
    key: SessionKey,
    guard: TurnGuard,
) -> ChatStream {
    let state = ReplyState {
        inner: reply,
        text: String::new(),
        store,
        key,
        guard: Some(guard),
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        let item = match st.inner.next().await {
            Some(item) => item,
            None => {
                st.guard.take();
                return None;
            }
        };

        match &item {
            Ok(StreamEvent::Delta(text)) => st.text.push_str(text),
            Ok(StreamEvent::Done) => {
                let reply = ChatMessage::assistant(std::mem::take(&mut st.text));
                if let Err(e) = st.store.append(&st.key, reply).await {
                    tracing::warn!(session = %st.key, error = %e, "failed to store assistant reply");
                }
                st.guard.take();
            }
            Err(e) => {
                tracing::warn!(session = %st.key, error = %e, "reply stream failed");
                st.guard.take();
            }
        }

        Some((item, st))
    }))
}
