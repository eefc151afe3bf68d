//! `project add|list|remove|validate|cleanup`: register/inspect/retire
//! projects in the state store.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cli::ProjectAction;
use crate::compose;
use crate::envgate;
use crate::envparse;
use crate::error::OtterError;
use crate::git::GitWorktreeManager;
use crate::layout::Paths;
use crate::lock::ProjectLock;
use crate::output::{self, TerminalSink};
use crate::store::{LifecycleState, NewProject, RepoKind, StateStore};
use crate::validate;

pub async fn run(store: &StateStore, paths: &Paths, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Add {
            name,
            repo,
            local,
            compose_file,
            retention,
            routing,
        } => add(store, paths, &name, &repo, local, &compose_file, retention, routing).await,
        ProjectAction::List => list(store),
        ProjectAction::Remove { name, force } => remove(store, paths, &name, force).await,
        ProjectAction::Validate { name } => validate_project(store, &name),
        ProjectAction::Cleanup { name } => cleanup_one(store, &name).await,
    }
}

async fn add(
    store: &StateStore,
    paths: &Paths,
    name: &str,
    repo: &str,
    local: bool,
    compose_file: &str,
    retention: u32,
    routing: bool,
) -> Result<()> {
    validate::project_name(name).map_err(anyhow::Error::from)?;
    if store.get_project(name)?.is_some() {
        bail!("project '{name}' already exists");
    }

    let repo_kind = if local { RepoKind::Local } else { RepoKind::Remote };
    let repo_path = if local {
        repo.to_string()
    } else {
        paths.repo_path(name).to_string_lossy().to_string()
    };

    let project = store.create_project(NewProject {
        name: name.to_string(),
        repo_kind,
        repo_url: (!local).then(|| repo.to_string()),
        repo_path: repo_path.clone(),
        compose_file: compose_file.to_string(),
        worktree_retention: retention,
        routing_enabled: routing,
    })?;

    let sink = TerminalSink;

    if local {
        let path = std::path::Path::new(&repo_path);
        if !path.join(".git").exists() {
            store.update_project_lifecycle(name, LifecycleState::CloneFailed)?;
            bail!("{} is not a git repository", path.display());
        }
    } else {
        output::info(&format!("verifying access to {repo}"));
        if let Err(e) = GitWorktreeManager::ls_remote_check(repo).await {
            store.update_project_lifecycle(name, LifecycleState::CloneFailed)?;
            bail!("could not reach {repo}: {e}");
        }

        output::info(&format!("cloning {repo}"));
        let dest = std::path::PathBuf::from(&repo_path);
        if let Err(e) = GitWorktreeManager::clone(repo, &dest, &sink).await {
            store.update_project_lifecycle(name, LifecycleState::CloneFailed)?;
            return Err(anyhow::Error::from(e)).context("clone failed");
        }
    }

    store.update_project_lifecycle(name, LifecycleState::Unconfigured)?;

    // First compose discovery + validation, advancing unconfigured -> ready.
    let default_ref_sha = GitWorktreeManager::resolve_ref(std::path::Path::new(&repo_path), "")
        .await
        .ok();
    if let Some(sha) = default_ref_sha {
        let head_compose = std::path::Path::new(&repo_path).join(compose_file);
        // For a remote clone the bare-ish repo_path is already a working
        // tree checked out at the default branch right after clone; for a
        // local project it always is. Either way the file is readable here
        // without creating a deployment worktree.
        if head_compose.exists() {
            let raw = std::fs::read_to_string(&head_compose)?;
            let refs = envparse::parse(&raw);
            let known = store.get_env_vars(name)?;
            let gate = envgate::validate(&refs, &known);
            if gate.all_present {
                store.update_project_lifecycle(name, LifecycleState::Ready)?;
            } else {
                output::warning(&envgate::render_checklist(name, &gate));
            }
        } else {
            output::warning(&format!(
                "compose file '{compose_file}' not found at {} yet",
                head_compose.display()
            ));
        }
        let _ = sha;
    }

    output::success(&format!("project '{name}' added ({})", project.lifecycle_state_str()));
    Ok(())
}

fn list(store: &StateStore) -> Result<()> {
    let projects = store.list_projects()?;
    if projects.is_empty() {
        output::info("no projects registered");
        return Ok(());
    }
    output::header("Projects");
    for p in projects {
        let active = store.get_active_deployment(p.id)?;
        let active_desc = active
            .map(|d| format!("active: {}", &d.git_sha[..7.min(d.git_sha.len())]))
            .unwrap_or_else(|| "no active deployment".to_string());
        println!(
            "  {:<20} {:<12} {:<10} {}",
            p.name,
            p.repo_kind_str(),
            p.lifecycle_state_str(),
            active_desc
        );
    }
    Ok(())
}

async fn remove(store: &StateStore, paths: &Paths, name: &str, force: bool) -> Result<()> {
    let project = store
        .get_project(name)?
        .ok_or_else(|| OtterError::UnknownProject(name.to_string()))?;

    // `--force` skips confirmation, not the lock: a project mid-deploy
    // must never be removed out from under it.
    let _lock = ProjectLock::acquire(paths.lock_file(name), paths.pid_file(name), name)
        .context("project is locked; cannot remove")?;
    let _ = force;

    let prefix = format!("{name}-");
    let running = compose::list_running(&prefix).await.unwrap_or_default();
    for stack in running {
        output::info(&format!("stopping {stack}"));
        if let Err(e) = compose::stop_by_name(&stack, Duration::from_secs(30)).await {
            output::warning(&format!("failed to stop {stack}: {e}"));
        }
    }

    if project.repo_kind == RepoKind::Remote {
        let repo_path = std::path::Path::new(&project.repo_path);
        if repo_path.exists() {
            std::fs::remove_dir_all(repo_path).ok();
        }
    }
    let worktrees_dir = paths.worktrees_dir(name);
    if worktrees_dir.exists() {
        std::fs::remove_dir_all(&worktrees_dir).ok();
    }
    let env_file = paths.env_file(name);
    if env_file.exists() {
        std::fs::remove_file(&env_file).ok();
    }

    store.delete_project(name)?;
    output::success(&format!("removed project '{name}'"));
    Ok(())
}

fn validate_project(store: &StateStore, name: &str) -> Result<()> {
    let project = store
        .get_project(name)?
        .ok_or_else(|| OtterError::UnknownProject(name.to_string()))?;
    let compose_path = std::path::Path::new(&project.repo_path).join(&project.compose_file);
    if !compose_path.exists() {
        bail!(OtterError::ComposeFileNotFound { path: compose_path });
    }
    let raw = std::fs::read_to_string(&compose_path)?;
    let refs = envparse::parse(&raw);
    let known = store.get_env_vars(name)?;
    let gate = envgate::validate(&refs, &known);
    if gate.all_present {
        output::success("all required environment variables are set");
    } else {
        print!("{}", envgate::render_checklist(name, &gate));
    }
    Ok(())
}

async fn cleanup_one(store: &StateStore, name: &str) -> Result<()> {
    let project = store
        .get_project(name)?
        .ok_or_else(|| OtterError::UnknownProject(name.to_string()))?;
    let protected = store
        .get_active_deployment(project.id)?
        .map(|d| crate::layout::compose_project_name(&project.name, &d.git_sha));

    let prefix = format!("{name}-");
    let running = compose::list_running(&prefix).await.unwrap_or_default();
    let mut stopped = 0;
    for stack in running {
        if Some(&stack) == protected.as_ref() {
            continue;
        }
        match compose::stop_by_name(&stack, Duration::from_secs(30)).await {
            Ok(()) => {
                stopped += 1;
                output::info(&format!("stopped {stack}"));
            }
            Err(e) => output::warning(&format!("failed to stop {stack}: {e}")),
        }
    }
    output::success(&format!("cleanup complete: {stopped} stack(s) stopped"));
    Ok(())
}
