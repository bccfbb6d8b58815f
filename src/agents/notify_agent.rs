//! agents::notify_agent
//!
//! Non-blocking collaborator notification: find recent chat messages
//! that the just-published change resolves and reply into their threads.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

use super::{Agent, AgentError, AgentLog, AgentServices};
use crate::core::context::RunContext;
use crate::core::types::{AgentKind, ErrorKind};
use crate::notify::ChatMessage;

pub struct NotifyAgent;

#[async_trait]
impl Agent for NotifyAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Notify
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        services: &AgentServices,
        log: &mut AgentLog,
    ) -> Result<serde_json::Value, AgentError> {
        let (Some(notifier), Some(config)) =
            (services.notifier.clone(), services.config.notify.clone())
        else {
            log.line("notifier unconfigured, nothing to do");
            return Ok(json!({"degraded": "unconfigured", "matched": 0, "replied": 0}));
        };

        let window = Duration::minutes(config.window_minutes);
        let messages = notifier
            .search(&config.channel, window)
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::RuntimeFailed, "chat search failed").with_cause(e)
            })?;
        log.line(format!("searched {} messages", messages.len()));

        let needles = build_needles(ctx, &config.keywords);
        let matched: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| matches_any(&m.text, &needles))
            .collect();

        let reply_text = resolution_text(ctx);
        let mut replied = 0usize;
        for message in &matched {
            match notifier.reply(&message.thread_id, &reply_text).await {
                Ok(()) => replied += 1,
                Err(e) => log.line(format!("reply to {} failed: {}", message.thread_id, e)),
            }
        }
        log.line(format!("matched {}, replied {}", matched.len(), replied));

        Ok(json!({
            "matched": matched.len(),
            "replied": replied,
        }))
    }
}

/// Search needles: commit messages, changed file names, configured
/// keywords. All lowercased.
fn build_needles(ctx: &RunContext, keywords: &[String]) -> Vec<String> {
    let mut needles: Vec<String> = Vec::new();
    for commit in &ctx.user_commits {
        let message = commit.message.trim().to_lowercase();
        if !message.is_empty() {
            needles.push(message);
        }
    }
    for file in &ctx.changed_files {
        if let Some(name) = file.file_name() {
            needles.push(name.to_string_lossy().to_lowercase());
        }
    }
    needles.extend(keywords.iter().map(|k| k.to_lowercase()));
    needles.retain(|n| !n.is_empty());
    needles
}

fn matches_any(text: &str, needles: &[String]) -> bool {
    let haystack = text.to_lowercase();
    needles.iter().any(|n| haystack.contains(n))
}

fn resolution_text(ctx: &RunContext) -> String {
    let subject = ctx
        .user_commits
        .first()
        .map(|c| c.message.clone())
        .unwrap_or_else(|| "latest change".to_string());
    format!(
        ":white_check_mark: resolved by \"{}\" (commitly run {})",
        subject, ctx.run_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ExecutionProfile;
    use crate::core::types::{CommitInfo, RunId};
    use std::path::PathBuf;

    fn ctx() -> RunContext {
        let mut ctx = RunContext::new(
            RunId::parse("0a1b2c3d").unwrap(),
            "p".to_string(),
            PathBuf::from("/w"),
            PathBuf::from("/h"),
            "origin".to_string(),
            "main".to_string(),
            vec![CommitInfo {
                id: "abc".to_string(),
                message: "Fix login timeout".to_string(),
                author: "dev".to_string(),
                timestamp: chrono::Utc::now(),
            }],
            ExecutionProfile {
                run_command: "python main.py".to_string(),
                test_command: "pytest".to_string(),
                timeout_secs: 300,
                memory_limit_mb: None,
                interpreter: None,
            },
        );
        ctx.changed_files = vec![PathBuf::from("/h/app/auth.py")];
        ctx
    }

    #[test]
    fn needles_include_commits_files_and_keywords() {
        let needles = build_needles(&ctx(), &["outage".to_string()]);
        assert!(needles.contains(&"fix login timeout".to_string()));
        assert!(needles.contains(&"auth.py".to_string()));
        assert!(needles.contains(&"outage".to_string()));
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let needles = build_needles(&ctx(), &[]);
        assert!(matches_any("anyone seen the FIX LOGIN TIMEOUT land?", &needles));
        assert!(matches_any("auth.py is broken again", &needles));
        assert!(!matches_any("unrelated chatter", &needles));
    }

    #[test]
    fn resolution_text_names_commit_and_run() {
        let text = resolution_text(&ctx());
        assert!(text.contains("Fix login timeout"));
        assert!(text.contains("0a1b2c3d"));
    }
}
