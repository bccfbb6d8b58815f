//! notify::slack
//!
//! Slack Web API implementation of the notifier.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{ChatMessage, Notifier, NotifyError};

const DEFAULT_BASE: &str = "https://slack.com/api";

/// Slack notifier. Replies are posted into the channel the notifier was
/// constructed for.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: Client,
    token: String,
    channel: String,
    base_url: String,
}

impl SlackNotifier {
    pub fn new(
        token: impl Into<String>,
        channel: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            channel: channel.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE.to_string()),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn search(
        &self,
        channel: &str,
        window: Duration,
    ) -> Result<Vec<ChatMessage>, NotifyError> {
        let oldest = (Utc::now() - window).timestamp();
        let response = self
            .client
            .get(format!("{}/conversations.history", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("channel", channel), ("oldest", &oldest.to_string())])
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Api(format!("history returned {}", status)));
        }

        let body: HistoryResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Api(e.to_string()))?;
        if !body.ok {
            return Err(match body.error.as_deref() {
                Some("invalid_auth") | Some("not_authed") => {
                    NotifyError::AuthFailed(body.error.unwrap_or_default())
                }
                _ => NotifyError::Api(body.error.unwrap_or_default()),
            });
        }

        Ok(body
            .messages
            .into_iter()
            .map(|m| {
                let posted_at = parse_slack_ts(&m.ts);
                ChatMessage {
                    thread_id: m.thread_ts.unwrap_or_else(|| m.ts.clone()),
                    id: m.ts,
                    text: m.text,
                    posted_at,
                }
            })
            .collect())
    }

    async fn reply(&self, thread_id: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "channel": self.channel,
                "thread_ts": thread_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let body: PostResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Api(e.to_string()))?;
        if body.ok {
            Ok(())
        } else {
            Err(NotifyError::Api(body.error.unwrap_or_default()))
        }
    }
}

/// Slack timestamps are `"<unix-seconds>.<sequence>"`.
fn parse_slack_ts(ts: &str) -> DateTime<Utc> {
    let secs = ts
        .split('.')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[derive(Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Deserialize)]
struct SlackMessage {
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct PostResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_parses_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [
                    {"ts": "1710000000.000100", "text": "login bug in app/auth.py"},
                    {"ts": "1710000300.000200", "thread_ts": "1710000000.000100", "text": "same here"}
                ]
            })))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new("xoxb-test", "C123", Some(server.uri()));
        let messages = notifier.search("C123", Duration::minutes(120)).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].thread_id, "1710000000.000100");
        assert_eq!(messages[1].thread_id, "1710000000.000100");
        assert!(messages[0].text.contains("auth.py"));
    }

    #[tokio::test]
    async fn auth_failure_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false, "error": "invalid_auth"
            })))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new("bad", "C123", Some(server.uri()));
        let err = notifier
            .search("C123", Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn reply_posts_into_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new("xoxb-test", "C123", Some(server.uri()));
        notifier
            .reply("1710000000.000100", "resolved by commit abc123")
            .await
            .unwrap();
    }

    #[test]
    fn slack_ts_parsing() {
        let at = parse_slack_ts("1710000000.000100");
        assert_eq!(at.timestamp(), 1710000000);
    }
}
