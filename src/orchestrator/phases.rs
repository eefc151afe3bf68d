//! The deploy transaction's phases after the deployment row exists: worktree
//! checkout, env file write, compose validate/pull/up, the health gate,
//! priority-label swap, then stopping the predecessor stack.

use std::time::Duration;

use tokio::process::Command;

use crate::compose::ComposeSession;
use crate::envgate;
use crate::envparse;
use crate::error::OtterError;
use crate::git::GitWorktreeManager;
use crate::health;
use crate::output::ProgressSink;
use crate::priority;
use crate::retention;
use crate::store::{Deployment, StateStore};

use super::context::OrchestratorContext;
use super::envfile;

/// Everything from "create/reuse worktree" through "retention", run after
/// the deployment row is already in `deploying`. A prior active deployment
/// (if any) is passed in, captured before this deploy began, so the
/// "stop predecessor" phase targets the stack that was actually serving —
/// not whatever the store considers "previous" after this deploy mutates it.
pub async fn run(
    store: &StateStore,
    ctx: &OrchestratorContext,
    sink: &dyn ProgressSink,
    sha: &str,
    deployment_id: i64,
    prior_active: Option<Deployment>,
) -> Result<(), OtterError> {
    ctx.check_cancelled()?;
    let worktree_path = ctx.worktree_path(sha);
    sink.status(&format!("creating/reusing worktree at {}", worktree_path.display()));
    GitWorktreeManager::create_worktree(&ctx.repo_path(), &worktree_path, sha).await?;

    let compose_file = ctx.compose_file_path(&worktree_path);
    if !compose_file.exists() {
        return Err(OtterError::ComposeFileNotFound { path: compose_file });
    }

    sink.status("writing env file");
    let vars = store.get_env_vars(&ctx.project.name)?;
    envfile::write(&ctx.env_file(), &vars)?;

    sink.status("validating environment variables");
    let raw_compose = std::fs::read_to_string(&compose_file)?;
    let refs = envparse::parse(&raw_compose);
    let gate = envgate::validate(&refs, &vars);
    if !gate.all_present {
        let checklist = envgate::render_checklist(&ctx.project.name, &gate);
        return Err(OtterError::MissingRequiredEnvVars { checklist });
    }
    for opt in &gate.optional {
        sink.warn(&format!(
            "{} not set, compose default {:?} will apply",
            opt.key, opt.default
        ));
    }

    ctx.check_cancelled()?;
    let project_name = ctx.compose_project_name(sha);
    let session = ComposeSession::new(worktree_path.clone(), compose_file.clone(), project_name.clone());

    sink.status("validating compose configuration");
    session.validate(Some(&ctx.env_file())).await?;

    let routing_host_detected = if ctx.project.routing_enabled {
        probe_routing_host().await
    } else {
        false
    };
    if ctx.project.routing_enabled && !routing_host_detected {
        sink.warn("routing enabled but no routing host detected; continuing without priority swap");
    }

    if !ctx.options.skip_pull {
        sink.status("pulling images");
        if let Err(e) = session.pull(Some(&ctx.env_file()), sink).await {
            sink.warn(&format!("pull failed, continuing: {e}"));
        }
    }

    ctx.check_cancelled()?;
    sink.status("starting new stack");
    if let Err(e) = session
        .up(Some(&ctx.env_file()), ctx.options.timeouts.deploy, sink)
        .await
    {
        if let Ok(tail) = session.logs(None, 50).await {
            sink.status(&format!("last 50 lines of logs:\n{tail}"));
        }
        return Err(e);
    }

    if ctx.project.routing_enabled && routing_host_detected {
        sink.status("waiting for services to become healthy");
        if let Err(e) = health::wait_healthy(&session, ctx.options.timeouts.health_wait, sink).await {
            sink.warn("new stack failed health gate; force-stopping it");
            let _ = tokio::time::timeout(
                ctx.options.timeouts.unhealthy_stop_grace,
                session.down(false, Duration::ZERO),
            )
            .await;
            return Err(e);
        }

        sink.status("applying routing priority override");
        let priority_value = priority::epoch_millis_priority();
        match priority::apply_priority(&worktree_path, &compose_file, priority_value) {
            Ok(Some(override_path)) => {
                let overridden = ComposeSession {
                    working_dir: worktree_path.clone(),
                    compose_files: vec![compose_file.clone(), override_path],
                    project_name: project_name.clone(),
                };
                overridden
                    .up(Some(&ctx.env_file()), ctx.options.timeouts.deploy, sink)
                    .await
                    .map_err(|e| OtterError::PriorityApplyFailed(e.to_string()))?;
            }
            Ok(None) => {
                sink.verbose("no routing-enabled services in compose file; skipping priority override");
            }
            Err(e) => return Err(OtterError::PriorityApplyFailed(e.to_string())),
        }
    }

    sink.status("deactivating previous deployments");
    store.deactivate_previous_deployments(ctx.project.id, deployment_id)?;

    if let Some(prev) = prior_active {
        let prev_project_name = ctx.compose_project_name(&prev.git_sha);
        if prev_project_name != project_name {
            sink.status("stopping predecessor stack");
            if let Err(e) =
                crate::compose::stop_by_name(&prev_project_name, ctx.options.timeouts.predecessor_stop_grace)
                    .await
            {
                sink.warn(&format!("predecessor stop failed (non-fatal): {e}"));
            }
        }
    }

    sink.status("enforcing worktree retention");
    if let Err(e) = retention::enforce(
        store,
        &ctx.repo_path(),
        ctx.project.id,
        ctx.project.worktree_retention,
        sink,
    )
    .await
    {
        sink.warn(&format!("retention pass failed (non-fatal): {e}"));
    }

    Ok(())
}

/// Detects whether a reverse-proxy host is reachable on this machine, by
/// checking for a well-known docker network the proxy is expected to join.
/// Deliberately proxy-agnostic: the minimal signal needed is "not detected
/// -> warn, continue without priority swap," not a specific proxy product.
async fn probe_routing_host() -> bool {
    let network = std::env::var("OTTERSTACK_ROUTING_NETWORK")
        .unwrap_or_else(|_| "otterstack-routing".to_string());
    Command::new("docker")
        .args(["network", "inspect", &network])
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

