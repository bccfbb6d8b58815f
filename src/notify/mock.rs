//! notify::mock
//!
//! In-memory notifier for deterministic tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{ChatMessage, Notifier, NotifyError};

#[derive(Debug, Default)]
struct MockInner {
    messages: Vec<ChatMessage>,
    replies: Vec<(String, String)>,
    fail: Option<NotifyError>,
}

/// Mock notifier. Thread-safe; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    inner: Arc<Mutex<MockInner>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a message visible to `search`.
    pub fn seed_message(&self, id: &str, text: &str) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.push(ChatMessage {
            id: id.to_string(),
            thread_id: id.to_string(),
            text: text.to_string(),
            posted_at: Utc::now(),
        });
        self
    }

    /// Make every operation fail with `error`.
    pub fn fail_with(&self, error: NotifyError) -> &Self {
        self.inner.lock().unwrap().fail = Some(error);
        self
    }

    /// Replies recorded so far as `(thread_id, text)`.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().replies.clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn search(
        &self,
        _channel: &str,
        _window: Duration,
    ) -> Result<Vec<ChatMessage>, NotifyError> {
        let inner = self.inner.lock().unwrap();
        if let Some(err) = &inner.fail {
            return Err(err.clone());
        }
        Ok(inner.messages.clone())
    }

    async fn reply(&self, thread_id: &str, text: &str) -> Result<(), NotifyError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = &inner.fail {
            return Err(err.clone());
        }
        inner
            .replies
            .push((thread_id.to_string(), text.to_string()));
        Ok(())
    }
}
