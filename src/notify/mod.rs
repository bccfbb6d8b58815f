//! notify
//!
//! Chat-platform notifier consumed by the Notify agent.
//!
//! # Design
//!
//! The `Notifier` trait is async network I/O behind a small surface:
//! search a channel window, reply into a thread. The default
//! implementation speaks the Slack Web API shape; tests use
//! [`MockNotifier`]. Notifier failures are recorded by the agent but
//! never change the pipeline's terminal status.

mod mock;
mod slack;

pub use mock::MockNotifier;
pub use slack::SlackNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors from notifier operations.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// Missing or rejected credentials.
    #[error("notifier authentication failed: {0}")]
    AuthFailed(String),

    /// Network or connection error.
    #[error("notifier network error: {0}")]
    Network(String),

    /// The platform returned an error.
    #[error("notifier API error: {0}")]
    Api(String),
}

/// One message returned from a channel search.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Platform message id.
    pub id: String,
    /// Thread the message belongs to (its own id for top-level posts).
    pub thread_id: String,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

/// Chat platform capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Messages posted to `channel` within the trailing `window`.
    async fn search(&self, channel: &str, window: Duration)
        -> Result<Vec<ChatMessage>, NotifyError>;

    /// Post a resolved-style reply into a thread.
    async fn reply(&self, thread_id: &str, text: &str) -> Result<(), NotifyError>;
}
