//! agents::report_agent
//!
//! Non-blocking audit-trail rendering: read the per-agent caches and
//! write a markdown report for the run.

use async_trait::async_trait;
use serde_json::json;

use super::{Agent, AgentError, AgentLog, AgentServices};
use crate::core::context::RunContext;
use crate::core::types::{AgentKind, ErrorKind};
use crate::report;

pub struct ReportAgent;

#[async_trait]
impl Agent for ReportAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Report
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        services: &AgentServices,
        log: &mut AgentLog,
    ) -> Result<serde_json::Value, AgentError> {
        let format = services.config.report.format.clone();
        if format != "md" {
            log.line(format!("format {} degrades to markdown", format));
        }

        let caches = report::collect_caches(&services.paths).map_err(|e| {
            AgentError::new(ErrorKind::RuntimeFailed, "cannot read agent caches").with_cause(e)
        })?;

        let today = chrono::Utc::now().date_naive();
        let path = report::write_report(&services.paths, &ctx.project_name, &caches, today, today)
            .map_err(|e| {
                AgentError::new(ErrorKind::RuntimeFailed, "cannot write report").with_cause(e)
            })?;
        log.line(format!("report written to {}", path.display()));

        Ok(json!({
            "path": path,
            "format": "md",
            "requested_format": format,
            "agents": caches.len(),
        }))
    }
}
