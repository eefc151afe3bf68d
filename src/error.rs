//! The error taxonomy from the design: one enum per distinguishable failure
//! kind, so callers (the orchestrator, the CLI) can match on kind rather
//! than parsing messages.

use std::path::PathBuf;

use thiserror::Error;

/// Observed `(status, health)` for one service at the moment a health wait
/// gave up or failed.
#[derive(Debug, Clone)]
pub struct ServiceObservation {
    pub service: String,
    pub status: String,
    pub health: String,
}

#[derive(Debug, Error)]
pub enum OtterError {
    #[error("project '{project}' is locked by pid {holder_pid}")]
    ProjectLocked { project: String, holder_pid: i32 },

    #[error("invalid project name '{0}': must match ^[a-z0-9]([a-z0-9-]{{0,62}}[a-z0-9])?$")]
    InvalidProjectName(String),

    #[error("invalid env var key '{0}': must match ^[A-Za-z_][A-Za-z0-9_]*$")]
    InvalidEnvKey(String),

    #[error("invalid git ref '{0}'")]
    InvalidGitRef(String),

    #[error("unknown project '{0}'")]
    UnknownProject(String),

    #[error("{path} is not a git repository")]
    NotGitRepo { path: PathBuf },

    #[error("compose file not found at {path}")]
    ComposeFileNotFound { path: PathBuf },

    #[error("missing required environment variables")]
    MissingRequiredEnvVars { checklist: String },

    #[error("docker compose config is invalid: {stderr}")]
    ComposeInvalid { stderr: String },

    #[error("compose command timed out after {seconds}s")]
    ComposeTimeout { seconds: u64 },

    #[error("failed to pull images: {0}")]
    PullFailed(String),

    #[error("failed to start containers: {0}")]
    UpFailed(String),

    #[error("health check failed: {0:?}")]
    HealthCheckFailed(Vec<ServiceObservation>),

    #[error("failed to apply routing priority override: {0}")]
    PriorityApplyFailed(String),

    #[error("failed to stop predecessor stack: {0}")]
    PredecessorStopFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("git operation failed: {0}")]
    GitFailed(String),

    #[error("failed to resolve git ref: {0}")]
    ResolveFailed(String),

    #[error("failed to fetch: {0}")]
    FetchFailed(String),

    #[error("no previous deployment to roll back to for project '{0}'")]
    NoRollbackTarget(String),

    #[error("deployment for sha '{sha}' not found for project '{project}'")]
    DeploymentNotFound { project: String, sha: String },

    #[error("state store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OtterError {
    /// Whether this kind is expected to be recovered locally (logged as a
    /// warning) rather than aborting the calling phase.
    pub fn is_warning_only(&self) -> bool {
        matches!(
            self,
            OtterError::PullFailed(_) | OtterError::PredecessorStopFailed(_)
        )
    }
}
