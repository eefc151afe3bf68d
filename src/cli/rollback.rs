//! `rollback <project> [--to <sha>]`: finds the rollback target and
//! delegates to the orchestrator's store-backed rollback.

use anyhow::Result;

use crate::layout::Paths;
use crate::orchestrator;
use crate::output::{self, TerminalSink};
use crate::store::StateStore;

pub async fn run(store: &StateStore, paths: &Paths, project: &str, to: Option<String>) -> Result<()> {
    output::header(&format!("Rolling back '{project}'"));
    let sink = TerminalSink;
    let deployment = orchestrator::rollback(store, paths, project, to.as_deref(), &sink).await?;
    output::success(&format!(
        "rolled back: deployment {} is now active at {}",
        deployment.id, deployment.git_sha
    ));
    Ok(())
}
