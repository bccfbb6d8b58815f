//! llm::mock
//!
//! Deterministic language model for tests.
//!
//! Queued responses are served in order per method; calls are recorded
//! for verification. An empty queue yields `LlmError::Network`, which
//! exercises the degraded paths.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{LanguageModel, LlmError};

/// Recorded call for test verification.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmCall {
    Complete { prompt: String, system: String },
    SuggestRefactoring { file_path: String },
    SuggestQueries { query: String, n: usize },
}

#[derive(Debug, Default)]
struct MockInner {
    completions: VecDeque<Result<String, LlmError>>,
    refactorings: VecDeque<Result<String, LlmError>>,
    query_lists: VecDeque<Result<Vec<String>, LlmError>>,
    calls: Vec<LlmCall>,
}

/// Mock language model. Thread-safe; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockLanguageModel {
    inner: Arc<Mutex<MockInner>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_completion(&self, response: impl Into<String>) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .completions
            .push_back(Ok(response.into()));
        self
    }

    pub fn queue_refactoring(&self, response: impl Into<String>) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .refactorings
            .push_back(Ok(response.into()));
        self
    }

    pub fn queue_refactoring_error(&self, error: LlmError) -> &Self {
        self.inner.lock().unwrap().refactorings.push_back(Err(error));
        self
    }

    pub fn queue_queries(&self, queries: Vec<&str>) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .query_lists
            .push_back(Ok(queries.into_iter().map(str::to_string).collect()));
        self
    }

    pub fn queue_queries_error(&self, error: LlmError) -> &Self {
        self.inner.lock().unwrap().query_lists.push_back(Err(error));
        self
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<LlmCall> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(LlmCall::Complete {
            prompt: prompt.to_string(),
            system: system.to_string(),
        });
        inner
            .completions
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("mock queue empty".to_string())))
    }

    async fn suggest_refactoring(
        &self,
        _code: &str,
        file_path: &str,
        _rules: &str,
    ) -> Result<String, LlmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(LlmCall::SuggestRefactoring {
            file_path: file_path.to_string(),
        });
        inner
            .refactorings
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("mock queue empty".to_string())))
    }

    async fn suggest_queries(
        &self,
        _schema: &str,
        query: &str,
        _dialect: &str,
        n: usize,
    ) -> Result<Vec<String>, LlmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(LlmCall::SuggestQueries {
            query: query.to_string(),
            n,
        });
        inner
            .query_lists
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("mock queue empty".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_responses_served_in_order() {
        let mock = MockLanguageModel::new();
        mock.queue_completion("first").queue_completion("second");

        assert_eq!(mock.complete("a", "s").await.unwrap(), "first");
        assert_eq!(mock.complete("b", "s").await.unwrap(), "second");
        assert!(mock.complete("c", "s").await.is_err());
    }

    #[tokio::test]
    async fn calls_are_recorded() {
        let mock = MockLanguageModel::new();
        mock.queue_queries(vec!["SELECT 1"]);
        let _ = mock
            .suggest_queries("schema", "SELECT * FROM t", "postgresql", 3)
            .await;

        assert_eq!(
            mock.calls(),
            vec![LlmCall::SuggestQueries {
                query: "SELECT * FROM t".to_string(),
                n: 3
            }]
        );
    }

    #[tokio::test]
    async fn queued_errors_surface() {
        let mock = MockLanguageModel::new();
        mock.queue_queries_error(LlmError::Malformed("prose".to_string()));
        assert!(matches!(
            mock.suggest_queries("s", "q", "postgresql", 3).await,
            Err(LlmError::Malformed(_))
        ));
    }
}
