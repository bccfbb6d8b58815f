//! cli::commands::init
//!
//! Scaffold `.commitly/` and synthesize a starter configuration.

use std::path::Path;

use anyhow::Result;

use crate::core::config::starter_yaml;
use crate::core::CommitlyPaths;
use crate::ui::{output, Verbosity};

/// Run the init command.
pub fn init(workspace: &Path, verbosity: Verbosity) -> Result<i32> {
    let paths = CommitlyPaths::new(workspace);

    std::fs::create_dir_all(paths.cache_dir())?;
    std::fs::create_dir_all(paths.logs_dir())?;
    std::fs::create_dir_all(paths.reports_dir())?;

    ensure_gitignored(workspace)?;

    let config_path = paths.config_file();
    if config_path.exists() {
        output::print(
            format!("config already present: {}", config_path.display()),
            verbosity,
        );
        return Ok(0);
    }

    let python = detect_interpreter();
    let entrypoint = detect_entrypoint(workspace);
    std::fs::write(&config_path, starter_yaml(&python, &entrypoint))?;

    output::print(
        format!(
            "initialized {} (interpreter: {}, entrypoint: {})",
            config_path.display(),
            python,
            entrypoint
        ),
        verbosity,
    );
    output::print(
        "edit commitly.yaml, then record a commit with `commitly commit -m ...`",
        verbosity,
    );
    Ok(0)
}

/// The state directory must never be committed into the user repo.
fn ensure_gitignored(workspace: &Path) -> Result<()> {
    let gitignore = workspace.join(".gitignore");
    let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == ".commitly/") {
        return Ok(());
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(".commitly/\n");
    std::fs::write(&gitignore, updated)?;
    Ok(())
}

fn detect_interpreter() -> String {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "python3".to_string())
}

/// Conventional entrypoints, most specific first.
fn detect_entrypoint(workspace: &Path) -> String {
    for candidate in ["manage.py", "main.py", "app.py"] {
        if workspace.join(candidate).exists() {
            return candidate.to_string();
        }
    }
    "main.py".to_string()
}
