//! CLI surface, one module per command family: `Cli` + `Command` enum via
//! `clap` derive, a `-v` counting verbosity flag, one handler module per
//! command.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod cleanup;
pub mod deploy;
pub mod env;
pub mod history;
pub mod project;
pub mod rollback;
pub mod status;
pub mod watch;

#[derive(Parser)]
#[command(
    name = "otterstack",
    version,
    about = "Deploy Docker Compose apps from git refs with zero-downtime switching and rollback"
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Deploy a project from a git ref (defaults to the remote's default branch)
    Deploy {
        project: String,
        /// Branch, tag, or commit sha; omit for the default branch
        git_ref: Option<String>,
        /// Per-deploy timeout in seconds, overriding the 15-minute default
        #[arg(long)]
        timeout: Option<u64>,
        /// Skip the image-pull phase
        #[arg(long)]
        skip_pull: bool,
    },

    /// Roll back to the previous (or a named) deployment
    Rollback {
        project: String,
        /// Roll back to this commit sha instead of the previous deployment
        #[arg(long = "to")]
        to: Option<String>,
    },

    /// Show the active deployment for a project
    Status {
        project: String,
        /// Include per-service status and health
        #[arg(long)]
        services: bool,
    },

    /// Show the deployment timeline for a project
    History {
        project: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        json: bool,
    },

    /// Manage a project's environment variables
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Reconcile interrupted deployments, orphaned worktrees, and untracked stacks
    Cleanup,

    /// Poll and print a project's status on an interval until interrupted
    Watch {
        project: String,
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
}

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Register a new project
    Add {
        name: String,
        /// Git URL for a remote project, or a filesystem path with `--local`
        repo: String,
        /// Treat `repo` as an existing local path rather than a URL to clone
        #[arg(long)]
        local: bool,
        #[arg(long, default_value = "docker-compose.yml")]
        compose_file: String,
        #[arg(long, default_value_t = 3)]
        retention: u32,
        /// Enable routing priority labels for zero-downtime switching
        #[arg(long)]
        routing: bool,
    },
    /// List all projects
    List,
    /// Remove a project; refuses while it holds the lock
    Remove {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Re-run the env-var validation gate against the project's compose file
    Validate { name: String },
    /// Stop any running compose stacks for this project not tied to its active deployment
    Cleanup { name: String },
}

#[derive(Subcommand)]
pub enum EnvAction {
    /// Set one KEY=VALUE pair
    Set { project: String, pair: String },
    /// Print a single variable's value
    Get { project: String, key: String },
    /// List every variable (values shown as-is; this store does not encrypt them)
    List { project: String },
    /// Remove a variable
    Unset { project: String, key: String },
    /// Bulk-load KEY=VALUE lines from a file
    Load {
        project: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Interactively prompt for every required variable the gate reports missing
    Scan { project: String },
}
