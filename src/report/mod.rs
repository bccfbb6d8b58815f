//! report
//!
//! Markdown rendering over the per-agent cache files.
//!
//! The Report agent (and the `report` subcommand) read
//! `.commitly/cache/<agent>.json` across a date range and produce a
//! single markdown document. Other requested formats degrade to
//! markdown with a warning; the document content is identical.

use std::path::Path;

use chrono::NaiveDate;
use thiserror::Error;

use crate::core::context::AgentCacheFile;
use crate::core::types::AgentKind;
use crate::core::CommitlyPaths;

/// Errors from report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no agent caches found in {0}")]
    NoData(String),
}

/// Load every readable agent cache file under the cache dir.
///
/// Unreadable or missing files are skipped; a fully empty cache dir is
/// an error so the caller can tell "no runs yet" from "empty report".
pub fn collect_caches(paths: &CommitlyPaths) -> Result<Vec<AgentCacheFile>, ReportError> {
    let mut caches = Vec::new();
    for kind in AgentKind::ORDER {
        let path = paths.agent_cache_file(kind);
        if let Ok(cache) = AgentCacheFile::load(&path) {
            caches.push(cache);
        }
    }
    if caches.is_empty() {
        return Err(ReportError::NoData(
            paths.cache_dir().display().to_string(),
        ));
    }
    Ok(caches)
}

/// Keep only caches whose start date falls inside `[from, to]`.
pub fn filter_by_date(
    caches: Vec<AgentCacheFile>,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<AgentCacheFile> {
    caches
        .into_iter()
        .filter(|c| {
            c.started_at
                .map(|at| {
                    let date = at.date_naive();
                    date >= from && date <= to
                })
                .unwrap_or(false)
        })
        .collect()
}

/// Render the markdown document.
pub fn render_markdown(
    project: &str,
    caches: &[AgentCacheFile],
    from: NaiveDate,
    to: NaiveDate,
) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# Commitly report: {}\n\n", project));
    doc.push_str(&format!("Period: {} to {}\n\n", from, to));

    doc.push_str("## Agents\n\n");
    doc.push_str("| Agent | Status | Branch | Started |\n");
    doc.push_str("|---|---|---|---|\n");
    for cache in caches {
        doc.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            cache.agent_name,
            cache.status,
            cache.branch.as_deref().unwrap_or("-"),
            cache
                .started_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ));
    }
    doc.push('\n');

    if let Some(test) = caches.iter().find(|c| c.agent_name == "test") {
        if let Some(sites) = test.data.get("sites").and_then(|s| s.as_array()) {
            if !sites.is_empty() {
                doc.push_str("## Query optimization\n\n");
                for site in sites {
                    let file = site["file"].as_str().unwrap_or("?");
                    let improvement = site["improvement_rate"].as_f64().unwrap_or(0.0);
                    let original = site["original_cost"].as_f64().unwrap_or(0.0);
                    let chosen = site["chosen_cost"].as_f64().unwrap_or(0.0);
                    doc.push_str(&format!(
                        "- `{}`: cost {:.1} -> {:.1} ({:.1}% improvement)\n",
                        file, original, chosen, improvement
                    ));
                }
                doc.push('\n');
            }
        }
    }

    if let Some(refactor) = caches.iter().find(|c| c.agent_name == "refactor") {
        if let Some(files) = refactor.data.get("files").and_then(|f| f.as_array()) {
            if !files.is_empty() {
                doc.push_str("## Refactoring\n\n");
                for file in files {
                    let path = file["file"].as_str().unwrap_or("?");
                    let status = file["status"].as_str().unwrap_or("?");
                    doc.push_str(&format!("- `{}`: {}\n", path, status));
                }
                doc.push('\n');
            }
        }
    }

    doc
}

/// Write a report next to the other run artifacts and return its path.
pub fn write_report(
    paths: &CommitlyPaths,
    project: &str,
    caches: &[AgentCacheFile],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<std::path::PathBuf, ReportError> {
    let doc = render_markdown(project, caches, from, to);
    let slug = slugify(project);
    let out = paths.report_file(&to.to_string(), &slug);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&out, doc)?;
    Ok(out)
}

/// Lowercase alphanumeric slug with single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}
