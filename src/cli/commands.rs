//! CLI command definitions using clap.
//!
//! - exec / git: fan a command out across repositories
//! - status: working tree status per repository
//! - freeze: snapshot create/restore/list/delete
//! - stash: coordinated stash save/pop/list/status/clear

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Loom - run shell and git operations across many repositories
#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository name from config, or a path (repeatable; default: all configured)
    #[arg(short, long = "repo", global = true)]
    pub repos: Vec<String>,

    /// Repositories processed at once (overrides config)
    #[arg(short = 'j', long, global = true)]
    pub workers: Option<usize>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an operation from the registry in every repository
    Exec {
        /// Per-repository timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Operation name (shell, git)
        #[arg(short, long, default_value = "shell")]
        operation: String,

        /// Operation arguments; for shell, the command line
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run `git <args>` in every repository
    Git {
        /// Per-repository timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show working tree status of every repository
    Status,

    /// Freeze snapshots
    Freeze {
        #[command(subcommand)]
        command: FreezeCommands,
    },

    /// Coordinated stashes
    Stash {
        #[command(subcommand)]
        command: StashCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FreezeCommands {
    /// Record commit and branch of every repository
    Create {
        name: String,
    },

    /// Return repositories to a snapshot
    Restore {
        /// Snapshot id, or name for the newest with that name
        snapshot: String,

        /// Restore only these repositories
        #[arg(long = "only")]
        only: Vec<String>,
    },

    /// List stored snapshots
    List {
        /// Only names containing this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Delete a snapshot by id, or all snapshots with a name
    Delete {
        snapshot: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum StashCommands {
    /// Stash local changes in every dirty repository
    Save {
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Pop the newest loom stash in every repository
    Pop {
        /// Only stashes whose message contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List stashes per repository
    List,

    /// Dirty flag and stash counts per repository
    Status,

    /// Drop every loom stash
    Clear,
}
