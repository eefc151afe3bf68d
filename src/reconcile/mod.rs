//! Reconciler (C10): heals state left behind by a crashed process, on
//! demand rather than as a background loop — interrupted deployment rows,
//! orphaned worktrees, untracked compose stacks, and stale worktree
//! metadata, each a log-and-continue step so one failure doesn't abort the
//! rest. Safe to run with nothing in flight; must not run concurrently
//! with a deploy on the same project, which callers enforce by holding
//! that project's lock while invoking it.

use std::collections::HashSet;
use std::time::Duration;

use crate::compose;
use crate::error::OtterError;
use crate::git::GitWorktreeManager;
use crate::layout::{compose_project_name, Paths};
use crate::output::ProgressSink;
use crate::store::StateStore;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub interrupted_deployments: usize,
    pub orphaned_worktrees_removed: usize,
    pub untracked_stacks_stopped: usize,
    pub warnings: Vec<String>,
}

pub async fn cleanup(
    store: &StateStore,
    paths: &Paths,
    sink: &dyn ProgressSink,
) -> Result<ReconcileReport, OtterError> {
    let mut report = ReconcileReport::default();

    // Step 1: deploying -> interrupted.
    match store.interrupt_stale_deployments() {
        Ok(rows) => {
            report.interrupted_deployments = rows.len();
            for r in &rows {
                sink.status(&format!(
                    "marked deployment {} (project_id {}) interrupted",
                    r.id, r.project_id
                ));
            }
        }
        Err(e) => report.warnings.push(format!("step 1 failed: {e}")),
    }

    let projects = match store.list_projects() {
        Ok(p) => p,
        Err(e) => {
            report.warnings.push(format!("could not list projects: {e}"));
            return Ok(report);
        }
    };
    let known_names: HashSet<String> = projects.iter().map(|p| p.name.clone()).collect();

    // Step 2: remove worktree directories under unknown project names.
    let worktrees_root = paths.worktrees_root();
    if let Ok(mut entries) = tokio::fs::read_dir(&worktrees_root).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if known_names.contains(&name) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    report.orphaned_worktrees_removed += 1;
                    sink.status(&format!("removed orphaned worktree dir {}", entry.path().display()));
                }
                Err(e) => report
                    .warnings
                    .push(format!("could not remove orphaned dir {}: {e}", entry.path().display())),
            }
        }
    }

    // Step 3 + 4: per project, stop untracked compose stacks and prune git
    // worktree registrations.
    for project in &projects {
        let prefix = format!("{}-", project.name);
        let protected = match store.get_active_deployment(project.id) {
            Ok(Some(dep)) => Some(compose_project_name(&project.name, &dep.git_sha)),
            Ok(None) => None,
            Err(e) => {
                report.warnings.push(format!(
                    "could not look up active deployment for {}: {e}",
                    project.name
                ));
                None
            }
        };

        match compose::list_running(&prefix).await {
            Ok(running) => {
                for stack in running {
                    if Some(&stack) == protected.as_ref() {
                        continue;
                    }
                    match compose::stop_by_name(&stack, Duration::from_secs(30)).await {
                        Ok(()) => {
                            report.untracked_stacks_stopped += 1;
                            sink.status(&format!("stopped untracked compose stack {stack}"));
                        }
                        Err(e) => report
                            .warnings
                            .push(format!("failed to stop untracked stack {stack}: {e}")),
                    }
                }
            }
            Err(e) => report
                .warnings
                .push(format!("could not list running stacks for {}: {e}", project.name)),
        }

        if project.repo_kind == crate::store::RepoKind::Remote {
            let repo_path = std::path::Path::new(&project.repo_path);
            if repo_path.exists() {
                if let Err(e) = GitWorktreeManager::prune(repo_path).await {
                    report
                        .warnings
                        .push(format!("prune failed for {}: {e}", project.name));
                }
            }
        }
    }

    for w in &report.warnings {
        sink.warn(w);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingSink;
    use crate::store::{NewDeployment, NewProject, RepoKind};

    #[tokio::test]
    async fn interrupts_deploying_rows_and_reports_orphaned_worktrees() {
        let store = StateStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths { data_dir: dir.path().to_path_buf() };
        paths.ensure_dirs().unwrap();

        let project = store
            .create_project(NewProject {
                name: "demo".to_string(),
                repo_kind: RepoKind::Local,
                repo_url: None,
                repo_path: "/tmp/repo".to_string(),
                compose_file: "docker-compose.yml".to_string(),
                worktree_retention: 3,
                routing_enabled: false,
            })
            .unwrap();
        store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_sha: "a".repeat(40),
                git_ref: String::new(),
                worktree_path: "/tmp/wt".to_string(),
            })
            .unwrap();

        // An orphaned worktree directory for an unknown project name.
        std::fs::create_dir_all(paths.worktrees_dir("ghost")).unwrap();

        let sink = RecordingSink::default();
        let report = cleanup(&store, &paths, &sink).await.unwrap();
        assert_eq!(report.interrupted_deployments, 1);
        assert_eq!(report.orphaned_worktrees_removed, 1);
        assert!(!paths.worktrees_dir("ghost").exists());
    }
}
