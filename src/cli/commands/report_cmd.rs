//! cli::commands::report_cmd
//!
//! Render a report over past runs for a date range.

use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;

use crate::cli::EXIT_CONFIG;
use crate::core::CommitlyPaths;
use crate::report;
use crate::ui::{output, Verbosity};

/// Run the report command.
pub fn report(
    workspace: &Path,
    from: &str,
    to: &str,
    format: Option<&str>,
    verbosity: Verbosity,
) -> Result<i32> {
    let (from, to) = match (parse_date(from), parse_date(to)) {
        (Some(from), Some(to)) if from <= to => (from, to),
        _ => {
            output::error("report dates must be YYYY-MM-DD with --from <= --to");
            return Ok(EXIT_CONFIG);
        }
    };

    if let Some(requested) = format {
        if requested != "md" {
            output::warn(
                format!("format {} not supported yet, rendering markdown", requested),
                verbosity,
            );
        }
    }

    let paths = CommitlyPaths::new(workspace);
    let caches = match report::collect_caches(&paths) {
        Ok(caches) => caches,
        Err(e) => {
            output::error(e);
            return Ok(1);
        }
    };
    let caches = report::filter_by_date(caches, from, to);
    if caches.is_empty() {
        output::print("no runs in the requested range", verbosity);
        return Ok(0);
    }

    let project = workspace
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    let path = report::write_report(&paths, &project, &caches, from, to)?;
    output::print(format!("report written: {}", path.display()), verbosity);
    Ok(0)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
