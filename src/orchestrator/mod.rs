//! Deployment Orchestrator (C9): the serialized state machine that glues
//! the lock manager, git worktree manager, compose driver, env-var gate,
//! health probe and routing priority controller into one deploy
//! transaction: acquire the project lock, run the phases in order, and
//! propagate the first fatal error.

pub mod context;
mod envfile;
mod phases;
mod rollback;

use crate::error::OtterError;
use crate::git::GitWorktreeManager;
use crate::layout::Paths;
use crate::lock::ProjectLock;
use crate::output::ProgressSink;
use crate::store::{DeploymentStatus, NewDeployment, RepoKind, StateStore};
use crate::validate;

pub use context::{DeployOptions, OrchestratorContext, Timeouts};
pub use rollback::rollback;

/// Runs one full deploy transaction for `project_name`. Any failure marks
/// the deployment row `failed` (if one was created) and always releases
/// the project lock on the way out.
pub async fn deploy(
    store: &StateStore,
    paths: &Paths,
    project_name: &str,
    options: DeployOptions,
    sink: &dyn ProgressSink,
) -> Result<crate::store::Deployment, OtterError> {
    validate::project_name(project_name)?;
    validate::git_ref(&options.git_ref)?;

    let project = store
        .get_project(project_name)?
        .ok_or_else(|| OtterError::UnknownProject(project_name.to_string()))?;

    // [ACQUIRE LOCK]. Contention returns `ProjectLocked` immediately,
    // before any deployment row is created.
    let _lock = ProjectLock::acquire(
        paths.lock_file(&project.name),
        paths.pid_file(&project.name),
        &project.name,
    )?;

    let ctx = OrchestratorContext::new(project.clone(), paths.clone(), options);

    // [FETCH] — remote repos only.
    ctx.check_cancelled()?;
    if ctx.project.repo_kind == RepoKind::Remote {
        sink.status("fetching");
        GitWorktreeManager::fetch(&ctx.repo_path(), sink).await?;
    }

    // [RESOLVE REF]
    ctx.check_cancelled()?;
    sink.status("resolving git ref");
    let sha = GitWorktreeManager::resolve_ref(&ctx.repo_path(), &ctx.options.git_ref).await?;
    sink.verbose(&format!("resolved to {sha}"));

    // Captured before this deploy mutates anything, so "stop predecessor"
    // targets the stack that was actually serving when this deploy began.
    let prior_active = store.get_active_deployment(ctx.project.id)?;

    // [CREATE DEPLOYMENT ROW: status=deploying]
    let deployment = store.create_deployment(NewDeployment {
        project_id: ctx.project.id,
        git_sha: sha.clone(),
        git_ref: ctx.options.git_ref.clone(),
        worktree_path: ctx.worktree_path(&sha).to_string_lossy().to_string(),
    })?;

    match phases::run(store, &ctx, sink, &sha, deployment.id, prior_active).await {
        Ok(()) => {
            store.update_deployment_status(deployment.id, DeploymentStatus::Active, None)?;
            sink.status(&format!("deployment {} is active ({sha})", deployment.id));
            let mut active = deployment;
            active.status = DeploymentStatus::Active;
            Ok(active)
        }
        Err(e) => {
            let _ = store.update_deployment_status(deployment.id, DeploymentStatus::Failed, Some(&e.to_string()));
            Err(e)
        }
    }
}
