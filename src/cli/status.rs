//! `status <project> [--services]`: shows a single project's active
//! deployment, plus, optionally, the live compose `ps` view C4 exposes.

use anyhow::Result;

use crate::compose::ComposeSession;
use crate::error::OtterError;
use crate::layout::compose_project_name;
use crate::output;
use crate::store::StateStore;

pub async fn run(store: &StateStore, project: &str, services: bool) -> Result<()> {
    let p = store
        .get_project(project)?
        .ok_or_else(|| OtterError::UnknownProject(project.to_string()))?;

    output::header(&format!("Status for '{project}'"));
    println!("  lifecycle: {}", p.lifecycle_state_str());

    let active = store.get_active_deployment(p.id)?;
    let Some(active) = active else {
        output::info("no active deployment");
        return Ok(());
    };

    println!("  deployment: {} (status {})", active.id, active.status.as_str());
    println!("  sha: {}", active.git_sha);
    if !active.git_ref.is_empty() {
        println!("  ref: {}", active.git_ref);
    }
    println!("  started: {}", active.started_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if !services {
        return Ok(());
    }

    let worktree_path = std::path::PathBuf::from(&active.worktree_path);
    let compose_file = worktree_path.join(&p.compose_file);
    if !compose_file.exists() {
        output::warning(&format!(
            "compose file not found at {}; cannot show per-service status",
            compose_file.display()
        ));
        return Ok(());
    }

    let project_name = compose_project_name(&p.name, &active.git_sha);
    let session = ComposeSession::new(worktree_path, compose_file, project_name);
    match session.status().await {
        Ok(rows) => {
            println!();
            println!("  {:<24} {:<20} {}", "SERVICE", "STATUS", "HEALTH");
            for row in rows {
                let health = if row.health.is_empty() { "-" } else { &row.health };
                println!("  {:<24} {:<20} {}", row.name, row.status, health);
            }
        }
        Err(e) => output::warning(&format!("could not query service status: {e}")),
    }
    Ok(())
}
