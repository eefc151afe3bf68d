mod cli;
mod compose;
mod envgate;
mod envparse;
mod error;
mod git;
mod health;
mod layout;
mod lock;
mod orchestrator;
mod output;
mod priority;
mod reconcile;
mod retention;
mod store;
mod validate;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, EnvAction};
use error::OtterError;
use layout::Paths;
use store::StateStore;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .init();

    if let Err(e) = dispatch(cli).await {
        report_and_exit(e);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let paths = Paths::resolve()?;
    paths.ensure_dirs()?;
    let store = StateStore::open(&paths.state_db())?;

    match cli.command {
        Command::Project { action } => cli::project::run(&store, &paths, action).await?,

        Command::Deploy {
            project,
            git_ref,
            timeout,
            skip_pull,
        } => {
            cli::deploy::run(&store, &paths, &project, git_ref, timeout, skip_pull).await?;
        }

        Command::Rollback { project, to } => {
            cli::rollback::run(&store, &paths, &project, to).await?;
        }

        Command::Status { project, services } => {
            cli::status::run(&store, &project, services).await?;
        }

        Command::History { project, limit, json } => {
            cli::history::run(&store, &project, limit, json)?;
        }

        Command::Env { action } => match action {
            EnvAction::Set { project, pair } => cli::env::set(&store, &project, &pair)?,
            EnvAction::Get { project, key } => cli::env::get(&store, &project, &key)?,
            EnvAction::List { project } => cli::env::list(&store, &project)?,
            EnvAction::Unset { project, key } => cli::env::unset(&store, &project, &key)?,
            EnvAction::Load { project, file } => cli::env::load(&store, &project, &file)?,
            EnvAction::Scan { project } => cli::env::scan(&store, &project)?,
        },

        Command::Cleanup => {
            cli::cleanup::run(&store, &paths).await?;
        }

        Command::Watch { project, interval } => {
            cli::watch::run(&store, &project, interval).await?;
        }
    }

    Ok(())
}

/// Maps any bubbled-up error to exit code 1, special-casing the two kinds
/// that need a structured, actionable message rather than a generic Debug
/// dump: the missing-env-vars checklist and the locked-project notice
/// naming the holder's pid.
fn report_and_exit(err: anyhow::Error) -> ! {
    match err.downcast_ref::<OtterError>() {
        Some(OtterError::MissingRequiredEnvVars { checklist }) => {
            eprint!("{checklist}");
        }
        Some(OtterError::ProjectLocked { project, holder_pid }) => {
            output::error(&format!(
                "project '{project}' is already being deployed (locked by pid {holder_pid})"
            ));
        }
        _ => {
            output::error(&format!("{err:#}"));
        }
    }
    std::process::exit(1);
}
