//! core::config
//!
//! Pipeline configuration loaded from `commitly.yaml`.
//!
//! # Locations
//!
//! 1. `<workspace>/commitly.yaml` - primary, written by `commitly init`
//! 2. `<workspace>/.commitly/config.yaml` - optional override, merged on
//!    top of the primary file key by key
//!
//! # Environment interpolation
//!
//! Any string value may reference environment variables as `${NAME}`.
//! Interpolation happens after the YAML parse and before validation, so
//! secrets (database passwords, API keys) never need to live in the file.
//!
//! # Validation
//!
//! `Config::validate` runs after loading. Missing required keys
//! (`execution.command`, `test.command`) surface as
//! `ConfigError::MissingKey`, which the CLI maps to exit code 3.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file was found.
    #[error("configuration not found: {0} (run `commitly init` first)")]
    NotFound(String),

    /// A required key is absent.
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),

    /// A value failed validation.
    #[error("invalid config value: {0}")]
    InvalidValue(String),

    /// `${NAME}` referenced an unset environment variable.
    #[error("config references unset environment variable: {0}")]
    MissingEnv(String),

    /// YAML parse error.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// I/O error reading a config file.
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub git: GitConfig,
    pub execution: ExecutionConfig,
    pub test: TestConfig,
    pub analysis: AnalysisConfig,
    pub database: Option<DatabaseConfig>,
    pub llm: LlmConfig,
    pub optimizer: OptimizerConfig,
    pub refactoring: RefactoringConfig,
    pub pipeline: PipelineConfig,
    pub notify: Option<NotifyConfig>,
    pub report: ReportConfig,
}

/// `git.*`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Remote name.
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
        }
    }
}

/// `execution.*` - the primary run command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Primary run command string (shell-quoted). Required.
    pub command: Option<String>,

    /// Timeout in seconds.
    pub timeout: u64,

    /// Interpreter binary path (e.g. `/usr/bin/python3`).
    pub python_bin: Option<String>,

    /// Advisory memory cap in megabytes for spawned processes.
    pub memory_limit_mb: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout: 300,
            python_bin: None,
            memory_limit_mb: None,
        }
    }
}

/// `test.*` - the project test command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    /// Test command string (shell-quoted). Required.
    pub command: Option<String>,

    /// Timeout in seconds.
    pub timeout: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout: 300,
        }
    }
}

/// `analysis.*` - static analyzers run by the Code agent.
///
/// Missing tools are a soft skip, so this list can be aspirational.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Linter / type-checker command strings.
    pub linters: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            linters: vec!["ruff check .".to_string()],
        }
    }
}

/// `database.*` - the optimizer's measurement target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// SQL dialect, e.g. `postgresql`.
    pub dialect: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            dbname: String::new(),
            dialect: "postgresql".to_string(),
        }
    }
}

/// `llm.*` - language-model handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub enabled: bool,
    pub model: String,
    pub api_key: Option<String>,
    /// API base URL for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
        }
    }
}

/// `optimizer.*` - query extraction heuristics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Names of database execution sinks whose string arguments are
    /// treated as embedded queries.
    pub sinks: Vec<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            sinks: vec![
                "execute".to_string(),
                "executemany".to_string(),
                "read_sql".to_string(),
                "raw".to_string(),
            ],
        }
    }
}

/// `refactoring.*`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RefactoringConfig {
    /// Prompt override for the refactoring rule set.
    pub rules: Option<String>,

    /// Formatter / auto-fixer command strings applied per file.
    pub formatters: Vec<String>,
}

impl Default for RefactoringConfig {
    fn default() -> Self {
        Self {
            rules: None,
            formatters: vec!["black".to_string()],
        }
    }
}

/// `pipeline.*`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Remove the hub directory entirely when a run fails.
    pub cleanup_hub_on_failure: bool,
}

/// `notify.*` - chat platform notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    /// Channel to search.
    pub channel: String,
    /// Search window in minutes.
    pub window_minutes: i64,
    /// API token.
    pub token: Option<String>,
    /// API base URL.
    pub base_url: Option<String>,
    /// Extra keywords matched against message content.
    pub keywords: Vec<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            window_minutes: 120,
            token: None,
            base_url: None,
            keywords: vec![],
        }
    }
}

/// `report.*`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Output format: `md`, `pdf`, or `html`. Non-markdown formats
    /// degrade to markdown at render time.
    pub format: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: "md".to_string(),
        }
    }
}

impl Config {
    /// Load configuration for a workspace.
    ///
    /// Reads the primary file, merges the optional override on top, then
    /// interpolates `${NAME}` references and validates.
    pub fn load(primary: &Path, override_file: &Path) -> Result<Self, ConfigError> {
        if !primary.exists() {
            return Err(ConfigError::NotFound(primary.display().to_string()));
        }

        let mut value: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(primary)?)?;

        if override_file.exists() {
            let overlay: serde_yaml::Value =
                serde_yaml::from_str(&std::fs::read_to_string(override_file)?)?;
            merge_values(&mut value, overlay);
        }

        interpolate_env(&mut value, &|name| std::env::var(name).ok())?;

        let config: Config = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string (no env interpolation).
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate required keys and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .execution
            .command
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(ConfigError::MissingKey("execution.command"));
        }
        if self
            .test
            .command
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(ConfigError::MissingKey("test.command"));
        }
        if self.execution.timeout == 0 || self.test.timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "timeouts must be positive".to_string(),
            ));
        }
        match self.report.format.as_str() {
            "md" | "pdf" | "html" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "report.format must be md, pdf, or html (got {})",
                    other
                )))
            }
        }
        Ok(())
    }

    /// The primary run command (validated present).
    pub fn execution_command(&self) -> &str {
        self.execution.command.as_deref().unwrap_or_default()
    }

    /// The test command (validated present).
    pub fn test_command(&self) -> &str {
        self.test.command.as_deref().unwrap_or_default()
    }
}

/// Merge `overlay` into `base`, mapping keys recursively; scalar and
/// sequence values in the overlay replace the base wholesale.
fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Replace `${NAME}` references in every string value.
fn interpolate_env(
    value: &mut serde_yaml::Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = interpolate_str(s, lookup)?;
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                interpolate_env(item, lookup)?;
            }
            Ok(())
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_env(item, lookup)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn interpolate_str(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let value = lookup(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()))?;
                out.push_str(&value);
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference, keep literal text.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Render a commented starter config for `commitly init`.
pub fn starter_yaml(python_bin: &str, entrypoint: &str) -> String {
    format!(
        "\
# Commitly pipeline configuration.
git:
  remote: origin

execution:
  command: \"{python} {entry}\"
  timeout: 300
  python_bin: {python}

test:
  command: \"pytest -q\"
  timeout: 300

# database:
#   host: localhost
#   port: 5432
#   user: app
#   password: ${{DB_PASSWORD}}
#   dbname: app
#   dialect: postgresql

llm:
  enabled: false
  model: gpt-4o-mini
#   api_key: ${{OPENAI_API_KEY}}

pipeline:
  cleanup_hub_on_failure: false
",
        python = python_bin,
        entry = entrypoint,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
execution:
  command: python main.py
test:
  command: pytest -q
";

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.git.remote, "origin");
        assert_eq!(config.execution.timeout, 300);
        assert_eq!(config.test.timeout, 300);
        assert!(!config.pipeline.cleanup_hub_on_failure);
        assert!(!config.llm.enabled);
        assert_eq!(config.report.format, "md");
    }

    #[test]
    fn missing_execution_command_is_rejected() {
        let err = Config::from_yaml("test:\n  command: pytest\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("execution.command")));
    }

    #[test]
    fn missing_test_command_is_rejected() {
        let err = Config::from_yaml("execution:\n  command: python main.py\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("test.command")));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let yaml = "\
execution:
  command: python main.py
  timeout: 0
test:
  command: pytest -q
";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = format!("{}\nunknown_section:\n  x: 1\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn invalid_report_format_is_rejected() {
        let yaml = format!("{}report:\n  format: docx\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn database_section_parses() {
        let yaml = format!(
            "{}database:\n  host: db.internal\n  port: 5433\n  user: app\n  password: s3cret\n  dbname: appdb\n  dialect: postgresql\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let db = config.database.unwrap();
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, 5433);
    }

    mod interpolation {
        use super::*;

        fn fake_env(name: &str) -> Option<String> {
            match name {
                "TOKEN" => Some("abc123".to_string()),
                "EMPTY" => Some(String::new()),
                _ => None,
            }
        }

        #[test]
        fn replaces_reference() {
            assert_eq!(
                interpolate_str("key-${TOKEN}-end", &fake_env).unwrap(),
                "key-abc123-end"
            );
        }

        #[test]
        fn replaces_multiple_references() {
            assert_eq!(
                interpolate_str("${TOKEN}/${EMPTY}/${TOKEN}", &fake_env).unwrap(),
                "abc123//abc123"
            );
        }

        #[test]
        fn missing_variable_errors() {
            let err = interpolate_str("${NOPE}", &fake_env).unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnv(name) if name == "NOPE"));
        }

        #[test]
        fn unterminated_reference_kept_literal() {
            assert_eq!(interpolate_str("a${TOKEN", &fake_env).unwrap(), "a${TOKEN");
        }

        #[test]
        fn no_references_untouched() {
            assert_eq!(
                interpolate_str("plain text", &fake_env).unwrap(),
                "plain text"
            );
        }
    }

    mod merge {
        use super::*;

        #[test]
        fn override_replaces_scalars_and_keeps_rest() {
            let mut base: serde_yaml::Value = serde_yaml::from_str(
                "execution:\n  command: python main.py\n  timeout: 300\ntest:\n  command: pytest\n",
            )
            .unwrap();
            let overlay: serde_yaml::Value =
                serde_yaml::from_str("execution:\n  timeout: 60\n").unwrap();

            merge_values(&mut base, overlay);
            let config: Config = serde_yaml::from_value(base).unwrap();
            assert_eq!(config.execution.timeout, 60);
            assert_eq!(config.execution.command.as_deref(), Some("python main.py"));
            assert_eq!(config.test.command.as_deref(), Some("pytest"));
        }
    }

    mod loading {
        use super::*;
        use tempfile::TempDir;

        #[test]
        fn load_with_override_file() {
            let temp = TempDir::new().unwrap();
            let primary = temp.path().join("commitly.yaml");
            let override_dir = temp.path().join(".commitly");
            std::fs::create_dir_all(&override_dir).unwrap();
            let override_file = override_dir.join("config.yaml");

            std::fs::write(&primary, MINIMAL).unwrap();
            std::fs::write(&override_file, "test:\n  timeout: 42\n").unwrap();

            let config = Config::load(&primary, &override_file).unwrap();
            assert_eq!(config.test.timeout, 42);
            assert_eq!(config.execution.timeout, 300);
        }

        #[test]
        fn missing_primary_is_not_found() {
            let temp = TempDir::new().unwrap();
            let err = Config::load(
                &temp.path().join("commitly.yaml"),
                &temp.path().join("nope.yaml"),
            )
            .unwrap_err();
            assert!(matches!(err, ConfigError::NotFound(_)));
        }
    }

    #[test]
    fn starter_yaml_is_loadable_after_uncommenting_nothing() {
        let yaml = starter_yaml("/usr/bin/python3", "main.py");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.execution.command.as_deref(),
            Some("/usr/bin/python3 main.py")
        );
        assert_eq!(config.execution.python_bin.as_deref(), Some("/usr/bin/python3"));
    }
}
