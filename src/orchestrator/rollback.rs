//! Rollback: stop the active stack, bring the rollback target's worktree
//! back up, swap routing priority, and record the outcome as a new
//! deployment row so rollback is itself an auditable history event rather
//! than a silent pointer flip.

use std::time::Duration;

use crate::compose::ComposeSession;
use crate::error::OtterError;
use crate::git::GitWorktreeManager;
use crate::layout::Paths;
use crate::lock::ProjectLock;
use crate::output::ProgressSink;
use crate::store::{Deployment, DeploymentStatus, NewDeployment, StateStore};
use crate::validate;

const PREDECESSOR_STOP_GRACE: Duration = Duration::from_secs(30);
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub async fn rollback(
    store: &StateStore,
    paths: &Paths,
    project_name: &str,
    target_sha: Option<&str>,
    sink: &dyn ProgressSink,
) -> Result<Deployment, OtterError> {
    validate::project_name(project_name)?;
    let project = store
        .get_project(project_name)?
        .ok_or_else(|| OtterError::UnknownProject(project_name.to_string()))?;

    let _lock = ProjectLock::acquire(
        paths.lock_file(&project.name),
        paths.pid_file(&project.name),
        &project.name,
    )?;

    let current = store
        .get_active_deployment(project.id)?
        .ok_or_else(|| OtterError::NoRollbackTarget(project.name.clone()))?;

    let target = match target_sha {
        Some(sha) => {
            let dep = store
                .get_deployment_by_sha(project.id, sha)?
                .ok_or_else(|| OtterError::DeploymentNotFound {
                    project: project.name.clone(),
                    sha: sha.to_string(),
                })?;
            if dep.id == current.id {
                return Err(OtterError::NoRollbackTarget(project.name.clone()));
            }
            dep
        }
        None => store
            .get_previous_deployment(project.id)?
            .ok_or_else(|| OtterError::NoRollbackTarget(project.name.clone()))?,
    };

    let repo_path = std::path::PathBuf::from(&project.repo_path);
    if !GitWorktreeManager::commit_exists(&repo_path, &target.git_sha).await? {
        return Err(OtterError::DeploymentNotFound {
            project: project.name.clone(),
            sha: target.git_sha.clone(),
        });
    }

    let target_worktree = std::path::PathBuf::from(&target.worktree_path);
    let target_compose_file = target_worktree.join(&project.compose_file);
    if !target_compose_file.exists() {
        return Err(OtterError::ComposeFileNotFound {
            path: target_compose_file,
        });
    }

    let target_project_name = crate::layout::compose_project_name(&project.name, &target.git_sha);
    let env_file = paths.env_file(&project.name);
    let target_session = ComposeSession::new(
        target_worktree.clone(),
        target_compose_file.clone(),
        target_project_name.clone(),
    );

    sink.status(&format!("re-validating target worktree at {}", target_worktree.display()));
    target_session.validate(Some(&env_file)).await?;

    sink.status("starting target stack");
    target_session.up(Some(&env_file), DEPLOY_TIMEOUT, sink).await?;

    let current_project_name = crate::layout::compose_project_name(&project.name, &current.git_sha);
    if current_project_name != target_project_name {
        sink.status("stopping current stack");
        if let Err(e) = crate::compose::stop_by_name(&current_project_name, PREDECESSOR_STOP_GRACE).await {
            sink.warn(&format!("failed to stop current stack (non-fatal): {e}"));
        }
    }

    store.update_deployment_status(current.id, DeploymentStatus::RolledBack, None)?;

    let new_row = store.create_deployment(NewDeployment {
        project_id: project.id,
        git_sha: target.git_sha.clone(),
        git_ref: target.git_ref.clone(),
        worktree_path: target.worktree_path.clone(),
    })?;
    store.update_deployment_status(new_row.id, DeploymentStatus::Active, None)?;
    store.deactivate_previous_deployments(project.id, new_row.id)?;

    sink.status(&format!("rolled back to {}", target.git_sha));

    Ok(Deployment {
        status: DeploymentStatus::Active,
        ..new_row
    })
}
