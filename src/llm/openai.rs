//! llm::openai
//!
//! OpenAI-compatible chat completions client.
//!
//! Works against api.openai.com and any endpoint speaking the same
//! protocol (a `base_url` override covers self-hosted gateways).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{strip_code_fence, LanguageModel, LlmError};

const DEFAULT_BASE: &str = "https://api.openai.com/v1";

/// System prompt for query candidate generation. The response contract
/// is a bare JSON array of SQL strings, which `suggest_queries` enforces.
const QUERY_SYSTEM: &str = "You are a SQL optimization assistant. Given a schema and a query, \
    produce alternative queries that are functionally identical: same projected columns and \
    types, same result multiset under the same parameters. Never emit DDL. Respond with a JSON \
    array of SQL strings and nothing else.";

const REFACTOR_SYSTEM: &str = "You are a careful refactoring assistant. Return only the complete \
    rewritten file content, no commentary.";

/// OpenAI-compatible implementation of [`LanguageModel`].
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiCompatible {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE.to_string()),
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        self.chat(system, prompt).await
    }

    async fn suggest_refactoring(
        &self,
        code: &str,
        file_path: &str,
        rules: &str,
    ) -> Result<String, LlmError> {
        let prompt = format!(
            "Refactor the file `{path}` under these rules:\n{rules}\n\nFile content:\n```\n{code}\n```",
            path = file_path,
            rules = rules,
            code = code,
        );
        let raw = self.chat(REFACTOR_SYSTEM, &prompt).await?;
        Ok(strip_code_fence(&raw).to_string())
    }

    async fn suggest_queries(
        &self,
        schema: &str,
        query: &str,
        dialect: &str,
        n: usize,
    ) -> Result<Vec<String>, LlmError> {
        let prompt = format!(
            "Dialect: {dialect}\n\nSchema:\n{schema}\n\nOriginal query:\n{query}\n\n\
             Produce exactly {n} alternative queries as a JSON array of strings.",
        );
        let raw = self.chat(QUERY_SYSTEM, &prompt).await?;
        parse_query_list(&raw, n)
    }
}

/// Parse the model's candidate list, tolerating a code fence around the
/// JSON array. Anything else is malformed and the site is skipped.
fn parse_query_list(raw: &str, n: usize) -> Result<Vec<String>, LlmError> {
    let body = strip_code_fence(raw);
    let parsed: Vec<String> = serde_json::from_str(body)
        .map_err(|e| LlmError::Malformed(format!("expected JSON array of strings: {}", e)))?;
    let candidates: Vec<String> = parsed
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if candidates.is_empty() || candidates.len() > n {
        return Err(LlmError::Malformed(format!(
            "expected up to {} candidates, got {}",
            n,
            candidates.len()
        )));
    }
    Ok(candidates)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn complete_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello back")))
            .mount(&server)
            .await;

        let llm = OpenAiCompatible::new("sk-test", "test-model", Some(server.uri()));
        let out = llm.complete("hello", "be brief").await.unwrap();
        assert_eq!(out, "hello back");
    }

    #[tokio::test]
    async fn api_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let llm = OpenAiCompatible::new("sk-test", "test-model", Some(server.uri()));
        let err = llm.complete("hello", "").await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 429, .. }));
    }

    #[tokio::test]
    async fn suggest_queries_parses_json_array() {
        let server = MockServer::start().await;
        let content = r#"["SELECT id FROM users", "SELECT id FROM users WHERE true"]"#;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(content)))
            .mount(&server)
            .await;

        let llm = OpenAiCompatible::new("sk-test", "test-model", Some(server.uri()));
        let queries = llm
            .suggest_queries("users(id int)", "SELECT * FROM users", "postgresql", 3)
            .await
            .unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0], "SELECT id FROM users");
    }

    #[tokio::test]
    async fn suggest_refactoring_strips_fence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body("```python\ndef f():\n    return 1\n```")),
            )
            .mount(&server)
            .await;

        let llm = OpenAiCompatible::new("sk-test", "test-model", Some(server.uri()));
        let out = llm
            .suggest_refactoring("def f(): return 1", "app.py", "extract duplicates")
            .await
            .unwrap();
        assert_eq!(out, "def f():\n    return 1");
    }

    mod parsing {
        use super::*;

        #[test]
        fn fenced_array_accepted() {
            let raw = "```json\n[\"SELECT 1\"]\n```";
            assert_eq!(parse_query_list(raw, 3).unwrap(), vec!["SELECT 1"]);
        }

        #[test]
        fn prose_rejected() {
            assert!(parse_query_list("Here are some ideas...", 3).is_err());
        }

        #[test]
        fn empty_array_rejected() {
            assert!(parse_query_list("[]", 3).is_err());
        }

        #[test]
        fn too_many_candidates_rejected() {
            let raw = r#"["a", "b", "c", "d"]"#;
            assert!(parse_query_list(raw, 3).is_err());
        }

        #[test]
        fn blank_entries_dropped() {
            let raw = r#"["SELECT 1", "  "]"#;
            assert_eq!(parse_query_list(raw, 3).unwrap(), vec!["SELECT 1"]);
        }
    }
}
