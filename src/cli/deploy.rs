//! `deploy <project> [ref]`: builds the deploy options from CLI flags and
//! hands off to the orchestrator's deploy transaction.

use anyhow::Result;

use crate::layout::Paths;
use crate::orchestrator::{self, DeployOptions, Timeouts};
use crate::output::{self, TerminalSink};
use crate::store::StateStore;

pub async fn run(
    store: &StateStore,
    paths: &Paths,
    project: &str,
    git_ref: Option<String>,
    timeout: Option<u64>,
    skip_pull: bool,
) -> Result<()> {
    let mut timeouts = Timeouts::default();
    if let Some(secs) = timeout {
        timeouts.deploy = std::time::Duration::from_secs(secs);
    }

    let options = DeployOptions {
        git_ref: git_ref.unwrap_or_default(),
        timeouts,
        skip_pull,
        ..Default::default()
    };

    output::header(&format!("Deploying '{project}'"));
    let sink = TerminalSink;
    let deployment = orchestrator::deploy(store, paths, project, options, &sink).await?;
    output::success(&format!(
        "deployment {} active at {}",
        deployment.id, deployment.git_sha
    ));
    Ok(())
}
