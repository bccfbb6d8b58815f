//! cli::commands::status
//!
//! Print the last run summary.

use std::path::Path;

use anyhow::Result;

use crate::core::CommitlyPaths;
use crate::pipeline::last_run;
use crate::ui::{output, Verbosity};

/// Run the status command.
pub fn status(workspace: &Path, verbosity: Verbosity) -> Result<i32> {
    let paths = CommitlyPaths::new(workspace);

    let Some(run) = last_run(&paths) else {
        output::print("no pipeline runs recorded yet", verbosity);
        return Ok(0);
    };

    output::print(
        format!(
            "last run {} started {}",
            run.run_id,
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        ),
        verbosity,
    );
    for (agent, outcome) in &run.outcomes {
        output::print(
            output::agent_line(agent, outcome.status, outcome.elapsed_ms),
            verbosity,
        );
        if let Some(error) = &outcome.error {
            output::print(format!("    {}", error), verbosity);
        }
    }
    output::print(format!("status: {}", run.status), verbosity);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_runs_is_exit_zero() {
        let temp = tempfile::TempDir::new().unwrap();
        assert_eq!(status(temp.path(), Verbosity::Quiet).unwrap(), 0);
    }
}
