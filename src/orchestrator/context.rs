//! Per-invocation context threaded through the orchestrator's phases: the
//! project, its paths, a cancellation token, and the timeout budget for
//! each stage of the deploy transaction.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::OtterError;
use crate::layout::{compose_project_name, short_sha, Paths};
use crate::store::Project;

/// Per-stage timeout budget. `deploy` (the end-to-end wall-clock limit) is
/// tunable by a CLI flag; the rest are fixed defaults.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub clone: Duration,
    pub fetch: Duration,
    pub deploy: Duration,
    pub health_wait: Duration,
    pub predecessor_stop_grace: Duration,
    pub unhealthy_stop_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(10 * 60),
            fetch: Duration::from_secs(2 * 60),
            deploy: Duration::from_secs(15 * 60),
            health_wait: Duration::from_secs(5 * 60),
            predecessor_stop_grace: Duration::from_secs(30),
            unhealthy_stop_grace: Duration::from_secs(60),
        }
    }
}

pub struct DeployOptions {
    pub git_ref: String,
    pub timeouts: Timeouts,
    pub skip_pull: bool,
    /// Cooperative cancellation, checked between phases. A fresh,
    /// never-cancelled token by default; callers that want ctrl-C to abort
    /// a deploy clone a shared token into this field instead.
    pub cancel: CancellationToken,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            git_ref: String::new(),
            timeouts: Timeouts::default(),
            skip_pull: false,
            cancel: CancellationToken::new(),
        }
    }
}

pub struct OrchestratorContext {
    pub project: Project,
    pub paths: Paths,
    pub options: DeployOptions,
}

impl OrchestratorContext {
    pub fn new(project: Project, paths: Paths, options: DeployOptions) -> Self {
        Self {
            project,
            paths,
            options,
        }
    }

    pub fn repo_path(&self) -> PathBuf {
        PathBuf::from(&self.project.repo_path)
    }

    pub fn compose_file_path(&self, worktree_path: &std::path::Path) -> PathBuf {
        worktree_path.join(&self.project.compose_file)
    }

    pub fn worktree_path(&self, sha: &str) -> PathBuf {
        self.paths.worktree_path(&self.project.name, short_sha(sha))
    }

    pub fn compose_project_name(&self, sha: &str) -> String {
        compose_project_name(&self.project.name, sha)
    }

    pub fn env_file(&self) -> PathBuf {
        self.paths.env_file(&self.project.name)
    }

    /// Checked at each phase boundary; returns `Cancelled` once the caller
    /// has requested cancellation, distinct from a `ComposeTimeout`.
    pub fn check_cancelled(&self) -> Result<(), OtterError> {
        if self.options.cancel.is_cancelled() {
            Err(OtterError::Cancelled)
        } else {
            Ok(())
        }
    }
}
