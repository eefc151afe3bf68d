//! `history <project> [--limit] [--json]`: renders the store's deployment
//! timeline, which already carries the status each entry needs
//! (active/inactive/rolled_back/...).

use anyhow::Result;
use serde_json::json;

use crate::error::OtterError;
use crate::output;
use crate::store::StateStore;

pub fn run(store: &StateStore, project: &str, limit: u32, as_json: bool) -> Result<()> {
    let p = store
        .get_project(project)?
        .ok_or_else(|| OtterError::UnknownProject(project.to_string()))?;
    let deployments = store.list_deployments(p.id, limit)?;

    if as_json {
        let rows: Vec<_> = deployments
            .iter()
            .map(|d| {
                json!({
                    "id": d.id,
                    "git_sha": d.git_sha,
                    "git_ref": d.git_ref,
                    "status": d.status.as_str(),
                    "worktree_path": d.worktree_path,
                    "started_at": d.started_at.to_rfc3339(),
                    "finished_at": d.finished_at.map(|t| t.to_rfc3339()),
                    "error_message": d.error_message,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if deployments.is_empty() {
        output::info(&format!("no deployments recorded for '{project}'"));
        return Ok(());
    }

    output::header(&format!("History for '{project}'"));
    for d in &deployments {
        let sha7 = &d.git_sha[..7.min(d.git_sha.len())];
        let ref_part = if d.git_ref.is_empty() {
            String::new()
        } else {
            format!(" ({})", d.git_ref)
        };
        println!(
            "  {:<8} {:<12} {}{}  {}",
            d.id,
            d.status.as_str(),
            sha7,
            ref_part,
            d.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(err) = &d.error_message {
            println!("           ! {err}");
        }
    }
    Ok(())
}
