//! core
//!
//! Domain types, configuration, path routing, locking, and the run
//! context shared by every pipeline stage.

pub mod config;
pub mod context;
pub mod lock;
pub mod paths;
pub mod types;

pub use config::{Config, ConfigError};
pub use context::{
    AgentCacheFile, AgentOutcome, ContextError, ExecutionProfile, PipelineRun, QuerySite,
    RunContext,
};
pub use lock::{LockError, PipelineLock};
pub use paths::CommitlyPaths;
pub use types::{
    AgentKind, AgentStatus, CommitInfo, ErrorKind, ErrorRecord, RepoHandle, RunId, RunStatus,
};
