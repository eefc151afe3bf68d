//! `cleanup` (global), a thin wrapper over the reconciler (C10).

use anyhow::Result;

use crate::layout::Paths;
use crate::output::{self, TerminalSink};
use crate::reconcile;
use crate::store::StateStore;

pub async fn run(store: &StateStore, paths: &Paths) -> Result<()> {
    output::header("Reconciling");
    let sink = TerminalSink;
    let report = reconcile::cleanup(store, paths, &sink).await?;
    output::success(&format!(
        "{} deployment(s) interrupted, {} orphaned worktree(s) removed, {} untracked stack(s) stopped",
        report.interrupted_deployments, report.orphaned_worktrees_removed, report.untracked_stacks_stopped
    ));
    if !report.warnings.is_empty() {
        output::warning(&format!("{} warning(s) during reconciliation", report.warnings.len()));
    }
    Ok(())
}
