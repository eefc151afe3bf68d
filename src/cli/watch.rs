//! `watch <project> [--interval]`: polls and reprints a project's status
//! until interrupted. Deliberately a plain terminal loop, not a full-screen
//! dashboard — no `ratatui`/`crossterm` dependency to support one.

use anyhow::Result;

use crate::output;
use crate::store::StateStore;

pub async fn run(store: &StateStore, project: &str, interval: u64) -> Result<()> {
    output::info(&format!(
        "watching '{project}' every {interval}s; press ctrl-c to stop"
    ));
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                println!();
                if let Err(e) = super::status::run(store, project, true).await {
                    output::error(&format!("{e}"));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                output::info("stopped watching");
                return Ok(());
            }
        }
    }
}
