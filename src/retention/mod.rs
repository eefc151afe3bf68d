//! Retention Policy (C11): after a successful deploy, trims worktrees
//! beyond the project's retention count, driven by the state store's
//! deployment timeline rather than a directory listing's mtimes.

use std::path::Path;

use crate::error::OtterError;
use crate::git::GitWorktreeManager;
use crate::output::ProgressSink;
use crate::store::{DeploymentStatus, StateStore};

/// Lists `project_id`'s deployments newest-first, skips the first
/// `retention` entries, and removes the worktree of every remaining entry
/// that isn't `active` or `deploying` and has a non-empty worktree path.
/// Each removal failure is a warning, never fatal — one deployment's stuck
/// worktree shouldn't abort cleanup for the rest.
pub async fn enforce(
    store: &StateStore,
    repo_path: &Path,
    project_id: i64,
    retention: u32,
    sink: &dyn ProgressSink,
) -> Result<(), OtterError> {
    let deployments = store.list_deployments(project_id, u32::MAX)?;
    let beyond_retention = deployments.into_iter().skip(retention as usize);

    for dep in beyond_retention {
        if matches!(
            dep.status,
            DeploymentStatus::Active | DeploymentStatus::Deploying
        ) {
            continue;
        }
        if dep.worktree_path.is_empty() {
            continue;
        }
        let path = Path::new(&dep.worktree_path);
        if !path.exists() {
            continue;
        }
        match GitWorktreeManager::remove_worktree(repo_path, path).await {
            Ok(()) => sink.verbose(&format!("retention: removed worktree {}", path.display())),
            Err(e) => sink.warn(&format!(
                "retention: failed to remove worktree {}: {e}",
                path.display()
            )),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingSink;
    use crate::store::{NewDeployment, NewProject, RepoKind};

    fn mk_project(store: &StateStore) -> crate::store::Project {
        store
            .create_project(NewProject {
                name: "demo".to_string(),
                repo_kind: RepoKind::Local,
                repo_url: None,
                repo_path: "/tmp/repo".to_string(),
                compose_file: "docker-compose.yml".to_string(),
                worktree_retention: 2,
                routing_enabled: false,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn skips_active_and_nonexistent_paths_without_error() {
        let store = StateStore::open_in_memory().unwrap();
        let project = mk_project(&store);

        let d1 = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_sha: "a".repeat(40),
                git_ref: String::new(),
                worktree_path: "/nonexistent/wt1".to_string(),
            })
            .unwrap();
        store
            .update_deployment_status(d1.id, DeploymentStatus::Active, None)
            .unwrap();

        let sink = RecordingSink::default();
        let repo = std::path::Path::new("/tmp/repo");
        let result = enforce(&store, repo, project.id, 0, &sink).await;
        assert!(result.is_ok());
    }
}
