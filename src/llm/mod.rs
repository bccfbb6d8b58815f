//! llm
//!
//! Language-model handle used by the Test optimizer and the Refactor
//! agent.
//!
//! # Design
//!
//! The `LanguageModel` trait is async because every call is network I/O.
//! The default implementation speaks the OpenAI-compatible chat
//! completions protocol over `reqwest`; tests use [`MockLanguageModel`].
//! A disabled or unreachable model degrades the calling agents to
//! no-ops, it never fails the pipeline.

mod mock;
mod openai;

pub use mock::MockLanguageModel;
pub use openai::OpenAiCompatible;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::LlmConfig;

/// Errors from language-model calls.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// The handle is disabled in configuration.
    #[error("language model disabled in configuration")]
    Disabled,

    /// No API key available.
    #[error("language model has no api key")]
    MissingApiKey,

    /// Network or connection error.
    #[error("language model network error: {0}")]
    Network(String),

    /// The API returned an error status.
    #[error("language model API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The response did not have the expected shape.
    #[error("malformed language model response: {0}")]
    Malformed(String),
}

/// The language-model capability consumed by the pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-form completion.
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError>;

    /// Produce a full refactored version of `code`.
    async fn suggest_refactoring(
        &self,
        code: &str,
        file_path: &str,
        rules: &str,
    ) -> Result<String, LlmError>;

    /// Produce exactly `n` functionally identical alternative queries.
    async fn suggest_queries(
        &self,
        schema: &str,
        query: &str,
        dialect: &str,
        n: usize,
    ) -> Result<Vec<String>, LlmError>;
}

/// Build the configured handle, or `LlmError::Disabled`/`MissingApiKey`
/// for callers to degrade on.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    if !config.enabled {
        return Err(LlmError::Disabled);
    }
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or(LlmError::MissingApiKey)?;
    Ok(Arc::new(OpenAiCompatible::new(
        api_key,
        config.model.clone(),
        config.base_url.clone(),
    )))
}

/// Strip a Markdown code fence if the whole payload is wrapped in one.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the first line.
    match body.split_once('\n') {
        Some((first, tail)) if !first.trim().contains(' ') => tail.trim_matches('\n'),
        _ => body.trim_matches('\n'),
    }
}
