//! A chat conversation with simulated "thinking" latency.
//!
//! Each user message schedules a bot reply on the tokio runtime after a
//! random delay. The scheduled task only holds a weak reference to the
//! conversation, so a conversation dropped before the timer fires simply
//! never receives the reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CompanionError, Result};
use crate::responder::Responder;

/// Opening line of every conversation.
pub const GREETING: &str = "Hello! I'm your wellness companion. I'm here to listen, provide \
                            support, and help you navigate your mental health journey. How are \
                            you feeling today?";

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            text: text.into(),
            sender,
            timestamp: Utc::now(),
        }
    }
}

/// Bounds of the simulated reply latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingDelay {
    min: Duration,
    max: Duration,
}

impl ThinkingDelay {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(CompanionError::InvalidDelay {
                min_ms: min.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            });
        }
        Ok(Self { min, max })
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self> {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    fn sample(&self, responder: &Responder) -> Duration {
        let spread = (self.max - self.min).as_millis() as usize;
        if spread == 0 {
            return self.min;
        }
        self.min + Duration::from_millis(responder.random_below(spread) as u64)
    }
}

impl Default for ThinkingDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1_500),
            max: Duration::from_millis(2_500),
        }
    }
}

struct Inner {
    responder: Responder,
    delay: ThinkingDelay,
    messages: Mutex<Vec<ChatMessage>>,
    pending: AtomicUsize,
}

impl Inner {
    fn push(&self, message: ChatMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

/// A reply scheduled by [`Conversation::send`].
///
/// Dropping it does not cancel the reply; awaiting [`PendingReply::wait`]
/// yields the bot message, or `None` if the conversation was gone by the
/// time the delay elapsed.
#[derive(Debug)]
pub struct PendingReply {
    task: JoinHandle<Option<ChatMessage>>,
}

impl PendingReply {
    pub async fn wait(self) -> Option<ChatMessage> {
        self.task.await.ok().flatten()
    }
}

/// A conversation between the user and the companion.
pub struct Conversation {
    inner: Arc<Inner>,
}

impl Conversation {
    /// Start a conversation with the greeting already posted.
    pub fn new(responder: Responder, delay: ThinkingDelay) -> Self {
        let inner = Arc::new(Inner {
            responder,
            delay,
            messages: Mutex::new(vec![ChatMessage::new(GREETING, Sender::Bot)]),
            pending: AtomicUsize::new(0),
        });
        Self { inner }
    }

    /// Post a user message and schedule the reply. Blank input is
    /// ignored. Must be called from within a tokio runtime.
    pub fn send(&self, text: &str) -> Option<PendingReply> {
        if text.trim().is_empty() {
            return None;
        }

        self.inner.push(ChatMessage::new(text, Sender::User));
        self.inner.pending.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.delay.sample(&self.inner.responder);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let prompt = text.to_string();
        debug!(delay_ms = delay.as_millis() as u64, "reply scheduled");

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                debug!("conversation closed before reply, dropping it");
                return None;
            };
            let reply = ChatMessage::new(inner.responder.reply(&prompt), Sender::Bot);
            inner.push(reply.clone());
            inner.pending.fetch_sub(1, Ordering::SeqCst);
            Some(reply)
        });
        Some(PendingReply { task })
    }

    /// Snapshot of all messages, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a reply is still being "typed".
    pub fn is_typing(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst) > 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
